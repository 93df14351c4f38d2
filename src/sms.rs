use serde_json::Value;
use tracing::{debug, error};

use crate::error::CoreError;

const GATEWAY_URL: &str = "https://www.fast2sms.com/dev/bulkV2";
const SMS_BODY_LIMIT: usize = 160;

/// Strip a raw destination down to the 10 digits the gateway expects.
///
/// Lossy on purpose: a leading "91" country prefix is dropped before the
/// 10-digit check, and anything longer than 10 digits keeps only its tail.
/// The transport depends on this exact shape.
pub fn normalize_destination(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.starts_with("91") && digits.len() > 2 {
        digits[2..].to_string()
    } else if digits.len() == 10 {
        digits
    } else if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

/// Clip a body to the single-SMS limit, marking the cut with an ellipsis.
pub fn truncate_body(body: &str) -> String {
    let chars: Vec<char> = body.chars().collect();
    if chars.len() > SMS_BODY_LIMIT {
        let mut clipped: String = chars[..SMS_BODY_LIMIT - 3].iter().collect();
        clipped.push_str("...");
        clipped
    } else {
        body.to_string()
    }
}

/// Decoded gateway acknowledgement.
#[derive(Debug, Clone, Default)]
pub struct GatewayReply {
    pub accepted: bool,
    pub request_id: Option<String>,
    pub status_code: Option<i64>,
    pub message: Option<String>,
}

impl GatewayReply {
    pub fn from_json(value: &Value) -> GatewayReply {
        GatewayReply {
            accepted: value.get("return").and_then(Value::as_bool).unwrap_or(false),
            request_id: value
                .get("request_id")
                .and_then(Value::as_str)
                .map(str::to_string),
            status_code: value.get("status_code").and_then(Value::as_i64),
            message: value.get("message").filter(|m| !m.is_null()).map(|m| {
                match m.as_str() {
                    Some(text) => text.to_string(),
                    None => m.to_string(),
                }
            }),
        }
    }
}

/// Outcome of one send attempt. Callers get a value either way; a
/// transport failure is never allowed to escape as a panic or crash.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    pub success: bool,
    pub message_id: Option<String>,
    pub error_detail: Option<String>,
}

pub trait SmsTransport {
    fn deliver(
        &self,
        numbers: &str,
        message: &str,
    ) -> impl std::future::Future<Output = Result<GatewayReply, CoreError>> + Send;
}

/// Fast2SMS bulkV2 transport (quick route).
pub struct Fast2Sms {
    client: reqwest::Client,
    api_key: String,
    sender_id: String,
}

impl Fast2Sms {
    pub fn new(api_key: String, sender_id: String) -> Fast2Sms {
        Fast2Sms {
            client: reqwest::Client::new(),
            api_key,
            sender_id,
        }
    }
}

impl SmsTransport for Fast2Sms {
    async fn deliver(&self, numbers: &str, message: &str) -> Result<GatewayReply, CoreError> {
        let form = [
            ("route", "q"),
            ("sender_id", self.sender_id.as_str()),
            ("message", message),
            ("flash", "0"),
            ("numbers", numbers),
        ];
        let response = self
            .client
            .post(GATEWAY_URL)
            .header("authorization", &self.api_key)
            .header("accept", "application/json")
            .form(&form)
            .send()
            .await
            .map_err(|err| CoreError::Transport(err.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|err| CoreError::Transport(format!("malformed gateway response: {err}")))?;
        Ok(GatewayReply::from_json(&body))
    }
}

/// Formats, normalizes, and sends one message, classifying failures.
pub struct Dispatcher<T> {
    transport: T,
}

impl<T: SmsTransport> Dispatcher<T> {
    pub fn new(transport: T) -> Dispatcher<T> {
        Dispatcher { transport }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn send(&self, raw_destination: &str, body: &str) -> SendOutcome {
        let numbers = normalize_destination(raw_destination);
        let message = truncate_body(body);

        match self.transport.deliver(&numbers, &message).await {
            Ok(reply) if reply.accepted => {
                debug!(to = %numbers, "sms accepted by gateway");
                SendOutcome {
                    success: true,
                    message_id: Some(reply.request_id.unwrap_or_else(|| "N/A".to_string())),
                    error_detail: None,
                }
            }
            Ok(reply) => {
                let detail = classify_rejection(&reply);
                error!(to = %numbers, %detail, "gateway rejected sms");
                SendOutcome {
                    success: false,
                    message_id: None,
                    error_detail: Some(detail),
                }
            }
            Err(err) => {
                error!(to = %numbers, %err, "sms transport failed");
                SendOutcome {
                    success: false,
                    message_id: None,
                    error_detail: Some(err.to_string()),
                }
            }
        }
    }
}

fn classify_rejection(reply: &GatewayReply) -> String {
    match reply.status_code {
        Some(412) => "Authentication failed. Please check your API key.".to_string(),
        Some(990) => {
            "API configuration error. Please check Fast2SMS v3 documentation.".to_string()
        }
        _ => reply
            .message
            .clone()
            .unwrap_or_else(|| "Unknown error".to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted transport double: pops one canned result per call and
    /// records what was delivered.
    pub struct ScriptedTransport {
        pub script: Mutex<Vec<Result<GatewayReply, CoreError>>>,
        pub delivered: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<GatewayReply, CoreError>>) -> ScriptedTransport {
            let mut script = script;
            script.reverse();
            ScriptedTransport {
                script: Mutex::new(script),
                delivered: Mutex::new(Vec::new()),
            }
        }

        pub fn accepting(count: usize) -> ScriptedTransport {
            ScriptedTransport::new(
                (0..count)
                    .map(|i| {
                        Ok(GatewayReply {
                            accepted: true,
                            request_id: Some(format!("req-{i}")),
                            status_code: None,
                            message: None,
                        })
                    })
                    .collect(),
            )
        }
    }

    impl SmsTransport for ScriptedTransport {
        async fn deliver(&self, numbers: &str, message: &str) -> Result<GatewayReply, CoreError> {
            self.delivered
                .lock()
                .unwrap()
                .push((numbers.to_string(), message.to_string()));
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(CoreError::Transport("script exhausted".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedTransport;
    use super::*;

    #[test]
    fn strips_country_prefix_and_formatting() {
        assert_eq!(normalize_destination("+91 98765 43210"), "9876543210");
        assert_eq!(normalize_destination("9876543210"), "9876543210");
    }

    #[test]
    fn normalization_is_idempotent_on_ten_digit_numbers() {
        let once = normalize_destination("9876543210");
        assert_eq!(normalize_destination(&once), once);
    }

    #[test]
    fn long_numbers_keep_the_last_ten_digits() {
        assert_eq!(normalize_destination("009876543210"), "9876543210");
    }

    #[test]
    fn short_numbers_pass_through() {
        assert_eq!(normalize_destination("43210"), "43210");
    }

    #[test]
    fn bodies_over_the_limit_are_clipped_with_ellipsis() {
        let body = "x".repeat(200);
        let clipped = truncate_body(&body);
        assert_eq!(clipped.chars().count(), 160);
        assert!(clipped.ends_with("..."));

        let short = truncate_body("all good");
        assert_eq!(short, "all good");
    }

    #[tokio::test]
    async fn accepted_reply_yields_success_with_message_id() {
        let dispatcher = Dispatcher::new(ScriptedTransport::accepting(1));
        let outcome = dispatcher.send("+91 98765 43210", "hello").await;
        assert!(outcome.success);
        assert_eq!(outcome.message_id.as_deref(), Some("req-0"));
    }

    #[tokio::test]
    async fn auth_and_config_rejections_map_to_fixed_details() {
        let dispatcher = Dispatcher::new(ScriptedTransport::new(vec![
            Ok(GatewayReply {
                accepted: false,
                status_code: Some(412),
                ..Default::default()
            }),
            Ok(GatewayReply {
                accepted: false,
                status_code: Some(990),
                ..Default::default()
            }),
        ]));

        let first = dispatcher.send("9876543210", "hello").await;
        assert!(!first.success);
        assert!(first.error_detail.unwrap().starts_with("Authentication failed"));

        let second = dispatcher.send("9876543210", "hello").await;
        assert!(second.error_detail.unwrap().starts_with("API configuration error"));
    }

    #[tokio::test]
    async fn other_rejections_pass_the_gateway_message_through() {
        let dispatcher = Dispatcher::new(ScriptedTransport::new(vec![Ok(GatewayReply {
            accepted: false,
            status_code: Some(402),
            message: Some("Insufficient wallet balance".to_string()),
            ..Default::default()
        })]));
        let outcome = dispatcher.send("9876543210", "hello").await;
        assert_eq!(outcome.error_detail.as_deref(), Some("Insufficient wallet balance"));
    }

    #[tokio::test]
    async fn transport_errors_become_structured_failures() {
        let dispatcher = Dispatcher::new(ScriptedTransport::new(vec![Err(
            CoreError::Transport("connection refused".to_string()),
        )]));
        let outcome = dispatcher.send("9876543210", "hello").await;
        assert!(!outcome.success);
        assert!(outcome.error_detail.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn delivered_message_is_normalized_and_truncated() {
        let transport = ScriptedTransport::accepting(1);
        let dispatcher = Dispatcher::new(transport);
        let body = "y".repeat(300);
        dispatcher.send("+91-98765-43210", &body).await;

        // Dispatcher owns the transport, so inspect through it.
        let delivered = dispatcher.transport.delivered.lock().unwrap();
        assert_eq!(delivered[0].0, "9876543210");
        assert_eq!(delivered[0].1.chars().count(), 160);
    }
}
