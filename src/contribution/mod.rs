//! Player contribution accounting.
//!
//! Pool revenue flows in through [`ContributionLedger::sync_from_pool`] or
//! [`ContributionLedger::record_delta`] as *pending* revenue, becomes
//! *realized* on checkout, and leaves through withdrawal or exchange.

mod amount;
mod checkout;
mod exchange;
mod ledger;
mod record;
mod store;

pub use amount::{Amount, AmountError, DECIMALS};
pub use checkout::{CheckoutCoordinator, CheckoutGuard};
pub use exchange::{DepositError, Economy, ExchangeReceipt, JournalEconomy};
pub use ledger::{CHECKOUT_WINDOW, CheckoutOutcome, ContributionLedger, LedgerSettings, SyncOutcome};
pub use record::{PlayerContribution, PlayerId, RECORD_VERSION, Realized, RevenueEntry};
pub use store::{ContributionStore, LEDGER_STATE_VERSION, LedgerState, OwedShare};
