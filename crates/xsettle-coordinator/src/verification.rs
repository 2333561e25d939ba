//! Inbound payment verification.
//!
//! A payment is accepted only when it is in a validated ledger with
//! `tesSUCCESS` and matches the purchase's instructions: from the buyer,
//! to the instruction destination, in the instruction currency, for at
//! least the instruction amount. A memo, when present, must name this
//! purchase.

use xsettle_ledger::LedgerClient;
use xsettle_types::{ObservedPayment, Purchase, Result, SettlementError, TxHash};

/// Locate the buyer's payment for `purchase` and check it.
///
/// With `claimed` the payment is fetched by hash; without it the ledger is
/// searched by destination and memo.
pub async fn verify_payment(
    client: &dyn LedgerClient,
    purchase: &Purchase,
    claimed: Option<&TxHash>,
) -> Result<ObservedPayment> {
    let observed = match claimed {
        Some(hash) => client.payment_by_hash(hash).await?,
        None => client.find_payment(&purchase.destination, &purchase.memo).await?,
    };
    let payment = observed.ok_or_else(|| SettlementError::PaymentNotFound {
        purchase_id: purchase.id.clone(),
    })?;
    check_payment(purchase, &payment)?;
    Ok(payment)
}

/// Match an observed payment against the purchase's instructions.
pub fn check_payment(purchase: &Purchase, payment: &ObservedPayment) -> Result<()> {
    let mismatch = |reason: String| SettlementError::PaymentMismatch {
        purchase_id: purchase.id.clone(),
        reason,
    };

    match &payment.validated_result {
        None => {
            return Err(SettlementError::PaymentNotFound {
                purchase_id: purchase.id.clone(),
            });
        }
        Some(result) if !result.is_success() => {
            return Err(mismatch(format!("payment {} failed with {result}", payment.tx_hash)));
        }
        Some(_) => {}
    }
    if payment.source != purchase.buyer_address {
        return Err(mismatch(format!(
            "sent by {}, expected {}",
            payment.source, purchase.buyer_address
        )));
    }
    if payment.destination != purchase.destination {
        return Err(mismatch(format!(
            "sent to {}, expected {}",
            payment.destination, purchase.destination
        )));
    }
    if payment.currency_code != purchase.currency.code() {
        return Err(mismatch(format!(
            "paid in {}, expected {}",
            payment.currency_code, purchase.currency
        )));
    }
    let owed = purchase.payment_amount()?;
    if payment.amount < owed {
        return Err(mismatch(format!("paid {}, owed {owed}", payment.amount)));
    }
    if let Some(memo) = &payment.memo {
        if memo.purchase_id().as_ref() != Some(&purchase.id) {
            return Err(mismatch(format!("memo {memo} belongs to another purchase")));
        }
    }
    Ok(())
}
