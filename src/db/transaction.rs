/*!
 * Transaction helper
 *
 * Runs a closure inside a database transaction: commit on `Ok`, rollback on
 * `Err`. The closure's own error type is preserved.
 */

use metrics::counter;
use sea_orm::{DatabaseConnection, DatabaseTransaction, DbErr, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Type alias for boxed future used in transactions
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Execute a function within a database transaction
///
/// ```rust,ignore
/// let snapshot = with_transaction(&db, |txn| {
///     Box::pin(async move {
///         touch_cart(txn, user_id).await?;
///         upsert_line(txn, user_id, product).await
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T, E>(db: &DatabaseConnection, f: F) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a DatabaseTransaction) -> BoxFuture<'a, Result<T, E>> + Send,
    T: Send,
    E: From<DbErr> + std::error::Error + Send,
{
    let result = db.transaction(f).await;

    match &result {
        Ok(_) => counter!("storefront_db.transaction.committed", 1),
        Err(_) => {
            debug!("Transaction rolled back");
            counter!("storefront_db.transaction.rolled_back", 1);
        }
    }

    result.map_err(|e| match e {
        TransactionError::Connection(db_err) => E::from(db_err),
        TransactionError::Transaction(e) => e,
    })
}
