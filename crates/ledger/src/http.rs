use crate::{LedgerClient, LedgerError, LedgerReceipt, LedgerResult};
use promobot_platform::{compute_hmac_signature_hex, validate_endpoint_url};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration as StdDuration;
use tracing::debug;

/// HTTP client for the ledger gateway. Every call is a signed POST whose
/// response carries `{"status": "ok", ...}` or an error code the caller
/// can classify.
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
    hmac_key_id: Option<String>,
    hmac_secret: Option<Vec<u8>>,
}

impl HttpLedgerClient {
    pub fn new(
        base_url: &str,
        request_timeout_ms: u64,
        hmac_key_id: &str,
        hmac_secret: &str,
    ) -> Result<Self, String> {
        validate_endpoint_url(base_url)?;
        let client = Client::builder()
            .timeout(StdDuration::from_millis(request_timeout_ms.max(1_000)))
            .build()
            .map_err(|error| format!("failed to build http client: {error}"))?;
        let key_id = hmac_key_id.trim();
        let secret = hmac_secret.trim();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            hmac_key_id: (!key_id.is_empty()).then(|| key_id.to_string()),
            hmac_secret: (!secret.is_empty()).then(|| secret.as_bytes().to_vec()),
        })
    }

    fn call(&self, action: &str, body: Value) -> LedgerResult<Value> {
        let body_bytes = serde_json::to_vec(&body)
            .map_err(|error| LedgerError::terminal("encode", error.to_string()))?;
        let mut builder = self
            .client
            .post(format!("{}/v1/contract/{}", self.base_url, action))
            .header("Content-Type", "application/json")
            .body(body_bytes.clone());
        if let (Some(key_id), Some(secret)) = (&self.hmac_key_id, &self.hmac_secret) {
            let signature = compute_hmac_signature_hex(secret, &body_bytes)
                .map_err(|error| LedgerError::terminal("hmac", error.to_string()))?;
            builder = builder
                .header("X-Auth-Key-Id", key_id)
                .header("X-Auth-Signature", signature);
        }
        let response = builder.send().map_err(|error| {
            let code = if error.is_timeout() {
                "timeout"
            } else if error.is_connect() {
                "connect"
            } else {
                "request"
            };
            LedgerError::retryable(code, format!("{action}: {error}"))
        })?;

        let status = response.status();
        let value: Value = response.json().map_err(|error| {
            LedgerError::retryable("decode", format!("{action}: {error}"))
        })?;
        if !status.is_success() {
            let code = format!("http_{}", status.as_u16());
            let detail = value.to_string();
            return if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                Err(LedgerError::retryable(code, format!("{action}: {detail}")))
            } else {
                Err(LedgerError::terminal(code, format!("{action}: {detail}")))
            };
        }

        match value.get("status").and_then(Value::as_str) {
            Some("ok") => {
                debug!(action, "ledger call succeeded");
                Ok(value)
            }
            Some(other) => {
                let detail = value
                    .get("detail")
                    .and_then(Value::as_str)
                    .unwrap_or("contract rejected the call");
                Err(LedgerError::terminal(
                    other.to_string(),
                    format!("{action}: {detail}"),
                ))
            }
            None => Err(LedgerError::retryable(
                "decode",
                format!("{action}: response missing status"),
            )),
        }
    }

    fn receipt(value: &Value, action: &str) -> LedgerResult<LedgerReceipt> {
        value
            .get("tx_ref")
            .and_then(Value::as_str)
            .map(|tx_ref| LedgerReceipt {
                tx_ref: tx_ref.to_string(),
            })
            .ok_or_else(|| {
                LedgerError::retryable("decode", format!("{action}: response missing tx_ref"))
            })
    }
}

impl LedgerClient for HttpLedgerClient {
    fn close_campaign(&self, ledger_ref: &str) -> LedgerResult<LedgerReceipt> {
        let value = self.call("close", json!({ "ref": ledger_ref }))?;
        Self::receipt(&value, "close")
    }

    fn expire_campaign(&self, ledger_ref: &str, owner: &str) -> LedgerResult<LedgerReceipt> {
        let value = self.call("expire", json!({ "ref": ledger_ref, "owner": owner }))?;
        Self::receipt(&value, "expire")
    }

    fn reserve_total_reward(
        &self,
        ledger_ref: &str,
        owner: &str,
        amount: u64,
        token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt> {
        let value = self.call(
            "reserve",
            json!({
                "ref": ledger_ref,
                "owner": owner,
                "amount": amount,
                "token_id": token_id,
            }),
        )?;
        Self::receipt(&value, "reserve")
    }

    fn transfer_reward(
        &self,
        recipient_wallet: &str,
        amount: u64,
        token_id: Option<&str>,
    ) -> LedgerResult<LedgerReceipt> {
        let value = self.call(
            "transfer",
            json!({
                "recipient": recipient_wallet,
                "amount": amount,
                "token_id": token_id,
            }),
        )?;
        Self::receipt(&value, "transfer")
    }

    fn query_balance(&self, owner: &str, token_id: Option<&str>) -> LedgerResult<u64> {
        let value = self.call(
            "balance",
            json!({ "owner": owner, "token_id": token_id }),
        )?;
        value
            .get("balance")
            .and_then(Value::as_u64)
            .ok_or_else(|| LedgerError::retryable("decode", "balance: response missing balance"))
    }
}
