//! Event names published by the legacy System.Data.SqlClient driver.

use super::LogicalEvent;

pub(super) const NAMES: &[(&str, LogicalEvent)] = &[
    ("System.Data.SqlClient.WriteCommandBefore", LogicalEvent::BEGIN_COMMAND),
    ("System.Data.SqlClient.WriteCommandAfter", LogicalEvent::END_COMMAND),
    ("System.Data.SqlClient.WriteCommandError", LogicalEvent::ERROR_COMMAND),
    ("System.Data.SqlClient.WriteConnectionOpenBefore", LogicalEvent::BEGIN_CONNECTION_OPEN),
    ("System.Data.SqlClient.WriteConnectionOpenAfter", LogicalEvent::END_CONNECTION_OPEN),
    ("System.Data.SqlClient.WriteConnectionOpenError", LogicalEvent::ERROR_CONNECTION_OPEN),
    ("System.Data.SqlClient.WriteConnectionCloseBefore", LogicalEvent::BEGIN_CONNECTION_CLOSE),
    ("System.Data.SqlClient.WriteConnectionCloseAfter", LogicalEvent::END_CONNECTION_CLOSE),
    ("System.Data.SqlClient.WriteConnectionCloseError", LogicalEvent::ERROR_CONNECTION_CLOSE),
    ("System.Data.SqlClient.WriteTransactionCommitBefore", LogicalEvent::BEGIN_TRANSACTION_COMMIT),
    ("System.Data.SqlClient.WriteTransactionCommitAfter", LogicalEvent::END_TRANSACTION_COMMIT),
    ("System.Data.SqlClient.WriteTransactionCommitError", LogicalEvent::ERROR_TRANSACTION_COMMIT),
    ("System.Data.SqlClient.WriteTransactionRollbackBefore", LogicalEvent::BEGIN_TRANSACTION_ROLLBACK),
    ("System.Data.SqlClient.WriteTransactionRollbackAfter", LogicalEvent::END_TRANSACTION_ROLLBACK),
    ("System.Data.SqlClient.WriteTransactionRollbackError", LogicalEvent::ERROR_TRANSACTION_ROLLBACK),
];
