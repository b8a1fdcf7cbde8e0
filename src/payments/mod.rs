//! Purchases: transactions, the payment provider adapter and its callback.

pub mod api;
pub mod models;
pub mod provider;
pub mod service;

pub use models::{
    PaymentDiscrepancy, Transaction, TransactionResolution, TransactionStatus, TransactionTicket,
};
pub use provider::{
    AccessCredential, CallbackSecurity, Payer, PaymentProvider, ProviderNotification,
    RemoteTransaction, RemoteTransactionRequest, TpayClient, TpayConfig, TransactionError,
};
pub use service::{PaymentError, PaymentService, Purchaser, ResolveOutcome};
