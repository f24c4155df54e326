use super::ConfigError;

/// Resolves the reference inside a `${...}` placeholder.
pub trait SecretResolver: Send + Sync {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError>;
}

/// Resolves `${VAR}` and `${env:VAR}` from the environment and
/// `${file:/path}` from the (trimmed) file content.
///
/// Backend credentials such as `NAV64BIT_PASSWORD` are normally supplied
/// this way: `url: "mssql://${NAV64BIT_USER}:${NAV64BIT_PASSWORD}@${NAV_HOST}/NAV501"`.
pub struct DefaultSecretResolver;

impl SecretResolver for DefaultSecretResolver {
    fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
        let reference = reference.trim();
        if let Some(path) = reference.strip_prefix("file:") {
            let path = path.trim();
            return std::fs::read_to_string(path)
                .map(|s| s.trim().to_string())
                .map_err(|e| ConfigError::Load(format!("Secret file '{path}': {e}")));
        }
        let var = reference.strip_prefix("env:").map(str::trim).unwrap_or(reference);
        std::env::var(var).map_err(|_| ConfigError::NotFound(format!("env:{var}")))
    }
}

/// Replace every `${...}` placeholder in `value`.
pub fn resolve_placeholders(
    value: &str,
    resolver: &dyn SecretResolver,
) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Load(format!("Unclosed placeholder in: {value}")))?;
        out.push_str(&resolver.resolve(&after[..end])?);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed;

    impl SecretResolver for Fixed {
        fn resolve(&self, reference: &str) -> Result<String, ConfigError> {
            match reference {
                "NAV_HOST" => Ok("nav01".into()),
                "NAV64BIT_USER" => Ok("svc".into()),
                other => Err(ConfigError::NotFound(other.into())),
            }
        }
    }

    #[test]
    fn resolves_every_placeholder() {
        let url = resolve_placeholders("mssql://${NAV64BIT_USER}@${NAV_HOST}/NAV501", &Fixed).unwrap();
        assert_eq!(url, "mssql://svc@nav01/NAV501");
    }

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(resolve_placeholders("sqlite::memory:", &Fixed).unwrap(), "sqlite::memory:");
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let err = resolve_placeholders("${NAV64BIT_PASSWORD}", &Fixed).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn unclosed_placeholder_is_an_error() {
        assert!(matches!(
            resolve_placeholders("${NAV_HOST", &Fixed),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn file_reference_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("nav-password");
        std::fs::write(&secret, "s3cret\n").unwrap();

        let value = format!("${{file:{}}}", secret.display());
        assert_eq!(resolve_placeholders(&value, &DefaultSecretResolver).unwrap(), "s3cret");
    }
}
