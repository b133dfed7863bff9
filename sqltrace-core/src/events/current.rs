//! Event names published by Microsoft.Data.SqlClient.

use super::LogicalEvent;

pub(super) const NAMES: &[(&str, LogicalEvent)] = &[
    ("Microsoft.Data.SqlClient.WriteCommandBefore", LogicalEvent::BEGIN_COMMAND),
    ("Microsoft.Data.SqlClient.WriteCommandAfter", LogicalEvent::END_COMMAND),
    ("Microsoft.Data.SqlClient.WriteCommandError", LogicalEvent::ERROR_COMMAND),
    ("Microsoft.Data.SqlClient.WriteConnectionOpenBefore", LogicalEvent::BEGIN_CONNECTION_OPEN),
    ("Microsoft.Data.SqlClient.WriteConnectionOpenAfter", LogicalEvent::END_CONNECTION_OPEN),
    ("Microsoft.Data.SqlClient.WriteConnectionOpenError", LogicalEvent::ERROR_CONNECTION_OPEN),
    ("Microsoft.Data.SqlClient.WriteConnectionCloseBefore", LogicalEvent::BEGIN_CONNECTION_CLOSE),
    ("Microsoft.Data.SqlClient.WriteConnectionCloseAfter", LogicalEvent::END_CONNECTION_CLOSE),
    ("Microsoft.Data.SqlClient.WriteConnectionCloseError", LogicalEvent::ERROR_CONNECTION_CLOSE),
    ("Microsoft.Data.SqlClient.WriteTransactionCommitBefore", LogicalEvent::BEGIN_TRANSACTION_COMMIT),
    ("Microsoft.Data.SqlClient.WriteTransactionCommitAfter", LogicalEvent::END_TRANSACTION_COMMIT),
    ("Microsoft.Data.SqlClient.WriteTransactionCommitError", LogicalEvent::ERROR_TRANSACTION_COMMIT),
    ("Microsoft.Data.SqlClient.WriteTransactionRollbackBefore", LogicalEvent::BEGIN_TRANSACTION_ROLLBACK),
    ("Microsoft.Data.SqlClient.WriteTransactionRollbackAfter", LogicalEvent::END_TRANSACTION_ROLLBACK),
    ("Microsoft.Data.SqlClient.WriteTransactionRollbackError", LogicalEvent::ERROR_TRANSACTION_ROLLBACK),
];
