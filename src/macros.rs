//! Shared macros and log-redaction helpers.

/// Mask the password component of a URL's userinfo, leaving scheme, user,
/// host, and path readable. `postgres://amphora:hunter2@db:5432/amphora`
/// becomes `postgres://amphora:[REDACTED]@db:5432/amphora`. URLs without a
/// password are returned unchanged.
pub(crate) fn redact_url_credentials(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let authority_end = url[authority_start..]
        .find(['/', '?', '#'])
        .map(|i| authority_start + i)
        .unwrap_or(url.len());

    let authority = &url[authority_start..authority_end];
    let Some(at) = authority.rfind('@') else {
        return url.to_string();
    };
    let userinfo = &authority[..at];
    let Some((user, _password)) = userinfo.split_once(':') else {
        return url.to_string();
    };

    format!(
        "{}{user}:[REDACTED]{}",
        &url[..authority_start],
        &url[authority_start + at..]
    )
}

/// Generate a `fmt::Debug` implementation that keeps credentials out of
/// logs. Connection strings, signing keys, and upstream API tokens all ride
/// in [`crate::config::Config`]; a derived `Debug` would leak every one of
/// them the first time startup logging prints the config.
///
/// Field kinds, specified as a keyword before the field name:
///
/// - `show field_name` - prints the field value normally
/// - `redact field_name` - prints `"[REDACTED]"` instead of the value
/// - `redact_option field_name` - prints `Some("[REDACTED]")` or `None`
/// - `redact_url field_name` - prints the URL with its password masked,
///   so host and database stay diagnosable
macro_rules! redacted_debug {
    ($name:ident { $( $kind:ident $field:ident ),* $(,)? }) => {
        impl ::std::fmt::Debug for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let mut s = f.debug_struct(stringify!($name));
                $( redacted_debug!(@add_field s, self, $kind, $field); )*
                s.finish_non_exhaustive()
            }
        }
    };
    (@add_field $s:ident, $self:ident, show, $field:ident) => {
        $s.field(stringify!($field), &$self.$field);
    };
    (@add_field $s:ident, $self:ident, redact, $field:ident) => {
        $s.field(stringify!($field), &"[REDACTED]");
    };
    (@add_field $s:ident, $self:ident, redact_option, $field:ident) => {
        $s.field(stringify!($field), &$self.$field.as_ref().map(|_| "[REDACTED]"));
    };
    (@add_field $s:ident, $self:ident, redact_url, $field:ident) => {
        $s.field(
            stringify!($field),
            &crate::macros::redact_url_credentials(&$self.$field),
        );
    };
}
