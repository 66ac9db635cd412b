use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;

use crate::{Codec, Error, ErrorInfo, IdKind, Profile};

/// Custom rendering of local failures into wire error objects.
#[derive(Clone)]
pub struct ErrorHandler(Arc<dyn Fn(&Error) -> ErrorInfo + Send + Sync>);

impl ErrorHandler {
    pub fn new(f: impl Fn(&Error) -> ErrorInfo + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    #[must_use]
    pub fn render(&self, error: &Error) -> ErrorInfo {
        (self.0)(error)
    }
}

impl PartialEq for ErrorHandler {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for ErrorHandler {}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler").finish()
    }
}

/// Interface-wide options shared by clients, proxies and routers.
#[serde_inline_default]
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone)]
pub struct Settings {
    /// Map `type_` to the RPC name `type`.
    #[serde_inline_default(true)]
    pub strip_trailing_underscore: bool,
    #[serde_inline_default(Duration::from_millis(500))]
    #[serde(with = "humantime_serde")]
    pub response_timeout: Duration,
    #[serde_inline_default("\n".to_string())]
    pub line_separator: String,
    #[serde_inline_default(Profile::Standard)]
    pub profile: Profile,
    #[serde_inline_default(IdKind::Numeric)]
    pub id_kind: IdKind,
    #[serde(skip)]
    pub error_handler: Option<ErrorHandler>,
}

impl Default for Settings {
    fn default() -> Self {
        serde_json::from_value(serde_json::Value::Object(serde_json::Map::default()))
            .expect("every settings field has a default")
    }
}

impl Settings {
    #[must_use]
    pub fn codec(&self) -> Codec {
        Codec::new(self.profile, &self.line_separator)
    }

    /// Renders a failure with the custom handler if one is set.
    #[must_use]
    pub fn render_error(&self, error: &Error) -> ErrorInfo {
        match &self.error_handler {
            Some(handler) => handler.render(error),
            None => ErrorInfo::from_error(error),
        }
    }

    /// Resolves the RPC name of a function without an explicit name.
    #[must_use]
    pub fn resolve_method_name<'a>(&self, fn_name: &'a str) -> &'a str {
        if self.strip_trailing_underscore {
            fn_name.strip_suffix('_').unwrap_or(fn_name)
        } else {
            fn_name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert!(settings.strip_trailing_underscore);
        assert_eq!(settings.response_timeout, Duration::from_millis(500));
        assert_eq!(settings.line_separator, "\n");
        assert_eq!(settings.profile, Profile::Standard);
        assert_eq!(settings.id_kind, IdKind::Numeric);
        assert!(settings.error_handler.is_none());
    }

    #[test]
    fn test_parse_settings() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "response_timeout": "2s",
            "profile": "minimal",
            "id_kind": "lexical",
            "line_separator": "\r\n",
        }))
        .unwrap();
        assert_eq!(settings.response_timeout, Duration::from_secs(2));
        assert_eq!(settings.profile, Profile::Minimal);
        assert_eq!(settings.id_kind, IdKind::Lexical);
        assert_eq!(settings.codec().separator(), b"\r\n");
        assert!(settings.strip_trailing_underscore);
    }

    #[test]
    fn test_resolve_method_name() {
        let mut settings = Settings::default();
        assert_eq!(settings.resolve_method_name("type_"), "type");
        assert_eq!(settings.resolve_method_name("add"), "add");
        settings.strip_trailing_underscore = false;
        assert_eq!(settings.resolve_method_name("type_"), "type_");
    }

    #[test]
    fn test_custom_error_handler() {
        let mut settings = Settings::default();
        let err = Error::new(ErrorKind::Unknown("db".into()), "down".into());
        assert_eq!(settings.render_error(&err).code, crate::msg::INTERNAL_ERROR);

        settings.error_handler = Some(ErrorHandler::new(|e| ErrorInfo::new(-1, e.msg.clone())));
        assert_eq!(settings.render_error(&err), ErrorInfo::new(-1, "down"));
    }
}
