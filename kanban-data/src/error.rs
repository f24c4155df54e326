use kanban_core::{BackendId, GatewayError};
use kanban_pool::NativeError;

use crate::query::Dialect;

/// Code attached to `BackendRejected` when a referenced record does not exist.
pub const NOT_FOUND: &str = "not_found";
/// Code attached to `BackendRejected` when a record already exists.
pub const CONFLICT: &str = "conflict";
/// Code attached to `BackendRejected` when the backend refused on privileges.
pub const PERMISSION_DENIED: &str = "permission_denied";

pub fn not_found(backend: BackendId, message: impl Into<String>) -> GatewayError {
    GatewayError::rejected(backend, NOT_FOUND, message)
}

pub fn conflict(backend: BackendId, message: impl Into<String>) -> GatewayError {
    GatewayError::rejected(backend, CONFLICT, message)
}

/// Normalise a driver failure into the gateway taxonomy.
///
/// Nothing driver-specific leaves an adapter; the native code is kept in
/// `BackendRejected` so callers can still tell constraint kinds apart.
pub fn classify(backend: BackendId, dialect: Dialect, err: &NativeError) -> GatewayError {
    if err.connection_lost {
        return GatewayError::unreachable(backend, err.message.clone());
    }
    let Some(code) = err.code.as_deref() else {
        return rejected(backend, None, &err.message);
    };
    match dialect {
        Dialect::Sqlite => classify_sqlite(backend, code, err),
        Dialect::MsSql => classify_mssql(backend, code, err),
        Dialect::Postgres | Dialect::MySql => classify_sqlstate(backend, code, err),
    }
}

fn rejected(backend: BackendId, code: Option<&str>, message: &str) -> GatewayError {
    GatewayError::BackendRejected {
        backend,
        code: code.map(str::to_string),
        message: message.to_string(),
    }
}

fn classify_sqlstate(backend: BackendId, code: &str, err: &NativeError) -> GatewayError {
    match code {
        "42501" => GatewayError::rejected(backend, PERMISSION_DENIED, err.message.clone()),
        c if c.starts_with("08") => GatewayError::unreachable(backend, err.message.clone()),
        c => rejected(backend, Some(c), &err.message),
    }
}

fn classify_mssql(backend: BackendId, code: &str, err: &NativeError) -> GatewayError {
    let Ok(number) = code.parse::<i64>() else {
        // Some drivers surface a SQLSTATE instead of the error number.
        return classify_sqlstate(backend, code, err);
    };
    match number {
        // Network errors and query timeout.
        53 | 233 | 10053 | 10054 | 10060 | -2 => {
            GatewayError::unreachable(backend, err.message.clone())
        }
        229 | 230 | 262 => GatewayError::rejected(backend, PERMISSION_DENIED, err.message.clone()),
        _ => rejected(backend, Some(code), &err.message),
    }
}

fn classify_sqlite(backend: BackendId, code: &str, err: &NativeError) -> GatewayError {
    let Ok(extended) = code.parse::<i64>() else {
        return rejected(backend, Some(code), &err.message);
    };
    match extended & 0xff {
        // BUSY, LOCKED, IOERR, CANTOPEN
        5 | 6 | 10 | 14 => GatewayError::unreachable(backend, err.message.clone()),
        _ => rejected(backend, Some(code), &err.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanban_core::ErrorKind;

    fn code_of(err: &GatewayError) -> Option<String> {
        match err {
            GatewayError::BackendRejected { code, .. } => code.clone(),
            _ => None,
        }
    }

    #[test]
    fn lost_connection_is_unreachable_in_every_dialect() {
        let native = NativeError::connection_lost("broken pipe");
        for dialect in [Dialect::Sqlite, Dialect::MsSql, Dialect::Postgres, Dialect::MySql] {
            let err = classify(BackendId::Erp, dialect, &native);
            assert_eq!(err.kind(), ErrorKind::BackendUnreachable);
            assert!(err.is_transient());
        }
    }

    #[test]
    fn sqlstate_classes() {
        let err = classify(BackendId::Secondary, Dialect::Postgres, &NativeError::with_code("08006", "gone"));
        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);

        let err = classify(BackendId::Secondary, Dialect::Postgres, &NativeError::with_code("23505", "dup"));
        assert_eq!(err.kind(), ErrorKind::BackendRejected);
        assert_eq!(code_of(&err).as_deref(), Some("23505"));

        let err = classify(BackendId::Secondary, Dialect::MySql, &NativeError::with_code("42501", "no"));
        assert_eq!(code_of(&err).as_deref(), Some(PERMISSION_DENIED));
    }

    #[test]
    fn sql_server_numbers() {
        let err = classify(BackendId::Erp, Dialect::MsSql, &NativeError::with_code("-2", "timeout"));
        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);

        let err = classify(BackendId::Erp, Dialect::MsSql, &NativeError::with_code("2627", "PK"));
        assert_eq!(code_of(&err).as_deref(), Some("2627"));

        let err = classify(BackendId::Erp, Dialect::MsSql, &NativeError::with_code("229", "denied"));
        assert_eq!(code_of(&err).as_deref(), Some(PERMISSION_DENIED));
    }

    #[test]
    fn sqlite_extended_codes() {
        // SQLITE_BUSY_SNAPSHOT = 517
        let err = classify(BackendId::General, Dialect::Sqlite, &NativeError::with_code("517", "busy"));
        assert_eq!(err.kind(), ErrorKind::BackendUnreachable);

        // SQLITE_CONSTRAINT_PRIMARYKEY = 1555
        let err = classify(BackendId::General, Dialect::Sqlite, &NativeError::with_code("1555", "UNIQUE"));
        assert_eq!(err.kind(), ErrorKind::BackendRejected);
        assert_eq!(code_of(&err).as_deref(), Some("1555"));
    }

    #[test]
    fn uncoded_failure_is_rejected_verbatim() {
        let err = classify(BackendId::General, Dialect::Sqlite, &NativeError::new("syntax error"));
        assert_eq!(err.kind(), ErrorKind::BackendRejected);
        assert!(err.to_string().contains("syntax error"));
        assert_eq!(code_of(&err), None);
    }
}
