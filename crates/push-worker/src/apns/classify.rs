//! APNs 响应分类
//!
//! 状态码 200 直接视为成功；其余按 `reason` 字段分为瞬时错误、配置错误、
//! 设备失效和未知错误四类。
//! 设备失效只认 `Unregistered`。

use std::str::FromStr;

use crate::provider::{AbortReason, DeliveryReport, Outcome};

/// APNs 失败原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApnsReason {
    BadCollapseId,
    BadDeviceToken,
    BadExpirationDate,
    BadMessageId,
    BadPriority,
    BadTopic,
    DeviceTokenNotForTopic,
    DuplicateHeaders,
    IdleTimeout,
    InvalidPushType,
    MissingDeviceToken,
    MissingTopic,
    PayloadEmpty,
    TopicDisallowed,
    BadCertificate,
    BadCertificateEnvironment,
    ExpiredProviderToken,
    Forbidden,
    InvalidProviderToken,
    MissingProviderToken,
    BadPath,
    MethodNotAllowed,
    ExpiredToken,
    Unregistered,
    PayloadTooLarge,
    TooManyProviderTokenUpdates,
    TooManyRequests,
    InternalServerError,
    ServiceUnavailable,
    Shutdown,
    Other(String),
}

impl FromStr for ApnsReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "BadCollapseId" => Self::BadCollapseId,
            "BadDeviceToken" => Self::BadDeviceToken,
            "BadExpirationDate" => Self::BadExpirationDate,
            "BadMessageId" => Self::BadMessageId,
            "BadPriority" => Self::BadPriority,
            "BadTopic" => Self::BadTopic,
            "DeviceTokenNotForTopic" => Self::DeviceTokenNotForTopic,
            "DuplicateHeaders" => Self::DuplicateHeaders,
            "IdleTimeout" => Self::IdleTimeout,
            "InvalidPushType" => Self::InvalidPushType,
            "MissingDeviceToken" => Self::MissingDeviceToken,
            "MissingTopic" => Self::MissingTopic,
            "PayloadEmpty" => Self::PayloadEmpty,
            "TopicDisallowed" => Self::TopicDisallowed,
            "BadCertificate" => Self::BadCertificate,
            "BadCertificateEnvironment" => Self::BadCertificateEnvironment,
            "ExpiredProviderToken" => Self::ExpiredProviderToken,
            "Forbidden" => Self::Forbidden,
            "InvalidProviderToken" => Self::InvalidProviderToken,
            "MissingProviderToken" => Self::MissingProviderToken,
            "BadPath" => Self::BadPath,
            "MethodNotAllowed" => Self::MethodNotAllowed,
            "ExpiredToken" => Self::ExpiredToken,
            "Unregistered" => Self::Unregistered,
            "PayloadTooLarge" => Self::PayloadTooLarge,
            "TooManyProviderTokenUpdates" => Self::TooManyProviderTokenUpdates,
            "TooManyRequests" => Self::TooManyRequests,
            "InternalServerError" => Self::InternalServerError,
            "ServiceUnavailable" => Self::ServiceUnavailable,
            "Shutdown" => Self::Shutdown,
            other => Self::Other(other.to_string()),
        })
    }
}

impl ApnsReason {
    pub fn parse(reason: &str) -> Self {
        match reason.parse() {
            Ok(reason) => reason,
            Err(never) => match never {},
        }
    }

    /// 失败原因对应的处理结果
    pub fn outcome(&self) -> Outcome {
        use ApnsReason::*;

        match self {
            InternalServerError
            | ServiceUnavailable
            | Shutdown
            | TooManyRequests
            | TooManyProviderTokenUpdates => Outcome::Abort(AbortReason::Transient),

            BadCollapseId
            | BadDeviceToken
            | BadExpirationDate
            | BadMessageId
            | BadPriority
            | BadTopic
            | DeviceTokenNotForTopic
            | DuplicateHeaders
            | IdleTimeout
            | InvalidPushType
            | MissingDeviceToken
            | MissingTopic
            | PayloadEmpty
            | TopicDisallowed
            | BadCertificate
            | BadCertificateEnvironment
            | ExpiredProviderToken
            | Forbidden
            | InvalidProviderToken
            | MissingProviderToken
            | BadPath
            | MethodNotAllowed
            | PayloadTooLarge => Outcome::Abort(AbortReason::Config),

            Unregistered => Outcome::Deregister,

            // 只有 Unregistered 会删除设备注册
            ExpiredToken | Other(_) => Outcome::Abort(AbortReason::Unrecognized),
        }
    }
}

/// 分类 APNs 响应
pub fn classify(report: &DeliveryReport) -> Outcome {
    if report.status == 200 {
        return Outcome::Delivered;
    }
    ApnsReason::parse(&report.reason).outcome()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(status: u16, reason: &str) -> DeliveryReport {
        DeliveryReport {
            status,
            reason: reason.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_classifier_scenarios() {
        let cases = [
            (503, "ServiceUnavailable", Outcome::Abort(AbortReason::Transient)),
            (500, "InternalServerError", Outcome::Abort(AbortReason::Transient)),
            (429, "TooManyRequests", Outcome::Abort(AbortReason::Transient)),
            (400, "BadDeviceToken", Outcome::Abort(AbortReason::Config)),
            (400, "TopicDisallowed", Outcome::Abort(AbortReason::Config)),
            (403, "BadCertificate", Outcome::Abort(AbortReason::Config)),
            (400, "IdleTimeout", Outcome::Abort(AbortReason::Config)),
            (410, "Unregistered", Outcome::Deregister),
            (410, "ExpiredToken", Outcome::Abort(AbortReason::Unrecognized)),
            (200, "", Outcome::Delivered),
            (418, "Teapot", Outcome::Abort(AbortReason::Unrecognized)),
            (400, "", Outcome::Abort(AbortReason::Unrecognized)),
        ];

        for (status, reason, expected) in cases {
            assert_eq!(
                classify(&report(status, reason)),
                expected,
                "status={status} reason={reason}"
            );
        }
    }

    #[test]
    fn test_success_ignores_reason() {
        assert_eq!(classify(&report(200, "Unregistered")), Outcome::Delivered);
    }

    #[test]
    fn test_parse_unknown_reason() {
        assert_eq!(
            ApnsReason::parse("SomethingNew"),
            ApnsReason::Other("SomethingNew".to_string())
        );
        assert_eq!(ApnsReason::parse("Shutdown"), ApnsReason::Shutdown);
    }
}
