//! Active locale and the handshake reason catalog.

use gatelink_core::HandshakeError;

/// Supplies the locale used for human-readable reasons and sent in the
/// `connect` request.
pub trait LocaleResolver: Send + Sync {
    /// BCP 47 style tag (e.g. `en-US`), or `None` when unknown.
    fn active_locale(&self) -> Option<String>;
}

/// Always the same locale.
#[derive(Clone, Debug, Default)]
pub struct FixedLocale(pub Option<String>);

impl FixedLocale {
    /// Fixed to `tag`.
    pub fn new(tag: impl Into<String>) -> Self {
        Self(Some(tag.into()))
    }
}

impl LocaleResolver for FixedLocale {
    fn active_locale(&self) -> Option<String> {
        self.0.clone()
    }
}

/// POSIX environment: `LC_ALL`, then `LC_MESSAGES`, then `LANG`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EnvLocale;

impl LocaleResolver for EnvLocale {
    fn active_locale(&self) -> Option<String> {
        ["LC_ALL", "LC_MESSAGES", "LANG"]
            .iter()
            .filter_map(|key| std::env::var(key).ok())
            .find_map(|raw| normalize_posix_locale(&raw))
    }
}

/// `zh_CN.UTF-8@x` → `zh-CN`; `C` and `POSIX` carry no language.
pub fn normalize_posix_locale(raw: &str) -> Option<String> {
    let base = raw.split(['.', '@']).next().unwrap_or("").trim();
    if base.is_empty() || base.eq_ignore_ascii_case("c") || base.eq_ignore_ascii_case("posix") {
        return None;
    }
    Some(base.replace('_', "-"))
}

/// Languages with catalog entries.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    /// English (fallback).
    En,
    /// Chinese.
    Zh,
}

impl Language {
    /// Pick the catalog language for a locale tag.
    pub fn for_locale(locale: Option<&str>) -> Self {
        match locale {
            Some(tag) if tag.to_ascii_lowercase().starts_with("zh") => Self::Zh,
            _ => Self::En,
        }
    }
}

/// Generic message when the gateway rejects `connect` without one.
pub fn generic_handshake_failure(lang: Language) -> &'static str {
    match lang {
        Language::En => "gateway handshake failed",
        Language::Zh => "网关握手失败",
    }
}

/// Actionable message for a pending device pairing.
pub fn pairing_required(lang: Language, request_id: &str) -> String {
    match lang {
        Language::En => format!(
            "device pairing required: ask an operator to approve pairing request {request_id}"
        ),
        Language::Zh => format!("需要设备配对：请管理员批准配对请求 {request_id}"),
    }
}

/// Human-readable close reason for a handshake failure.
///
/// Server-provided rejection messages pass through untranslated.
pub fn handshake_reason(lang: Language, error: &HandshakeError) -> String {
    match (error, lang) {
        (HandshakeError::ChallengeTimeout, Language::En) => {
            "missing connect challenge: gateway sent no nonce in time".into()
        }
        (HandshakeError::ChallengeTimeout, Language::Zh) => "未及时收到网关的连接挑战".into(),
        (HandshakeError::ConnectTimeout, Language::En) => {
            "gateway did not answer the connect request in time".into()
        }
        (HandshakeError::ConnectTimeout, Language::Zh) => "网关未及时响应连接请求".into(),
        (HandshakeError::PairingRequired { message, .. }, _)
        | (HandshakeError::Rejected { message, .. }, _) => message.clone(),
        (HandshakeError::Identity { message }, Language::En) => {
            format!("device identity unavailable: {message}")
        }
        (HandshakeError::Identity { message }, Language::Zh) => {
            format!("设备身份不可用：{message}")
        }
    }
}
