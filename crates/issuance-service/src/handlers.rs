//! API request handlers for QR issuance, image retrieval and status checks

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use khqr_common::{BillNumber, Error, ErrorKind, IssuanceRequest, IssuanceResponse};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

/// API Error type
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: &str) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message
        });

        (self.status, Json(body)).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        let kind = err.kind();
        let status = StatusCode::from_u16(kind.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        // Server-side details stay in the log
        let message = if kind.is_client_error() {
            err.to_string()
        } else {
            error!("Request failed: {}", err);
            match kind {
                ErrorKind::RenderFailure => "Failed to generate QR code image",
                ErrorKind::EncodingFailure => "Failed to generate QR code",
                ErrorKind::UpstreamUnavailable => "Failed to check transaction status",
                _ => "Failed to record transaction",
            }
            .to_string()
        };

        ApiError { status, message }
    }
}

/// Amount as sent by clients: JSON number or numeric string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum AmountParam {
    Number(f64),
    Text(String),
}

impl AmountParam {
    /// Unparseable text becomes NaN and is rejected by validation
    fn value(&self) -> f64 {
        match self {
            AmountParam::Number(n) => *n,
            AmountParam::Text(s) => s.trim().parse().unwrap_or(f64::NAN),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, AmountParam::Text(s) if s.trim().is_empty())
    }
}

/// Issuance parameters, from the query string or a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct GenerateQrParams {
    pub amount: Option<AmountParam>,
    #[serde(rename = "bakongAccountID")]
    pub bakong_account_id: Option<String>,
    #[serde(rename = "merchantName")]
    pub merchant_name: Option<String>,
}

/// Status check parameters, from the query string or a JSON body
#[derive(Debug, Default, Deserialize)]
pub struct CheckTransactionParams {
    pub md5: Option<String>,
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
}

/// Only JSON bodies carry parameters; any other body is ignored
fn parse_body<T: DeserializeOwned + Default>(headers: &HeaderMap, body: &Bytes) -> Result<T, ApiError> {
    if !is_json(headers) || body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::bad_request(&format!("Invalid JSON body: {}", e)))
}

fn parse_query<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|e| ApiError::bad_request(&format!("Invalid query string: {}", e.body_text())))
}

/// Query value wins unless it is missing or empty
fn pick(query: Option<String>, body: Option<String>) -> Option<String> {
    query
        .filter(|value| !value.is_empty())
        .or(body)
        .filter(|value| !value.is_empty())
}

/// Health check endpoint
pub async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "khqr-gateway"
    }))
}

/// Issue a payment QR code
pub async fn generate_qr_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<GenerateQrParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<IssuanceResponse>, ApiError> {
    let query = parse_query(query)?;
    let body: GenerateQrParams = parse_body(&headers, &body)?;

    let amount = query
        .amount
        .filter(|amount| !amount.is_blank())
        .or(body.amount)
        .filter(|amount| !amount.is_blank());
    let account_id = pick(query.bakong_account_id, body.bakong_account_id);
    let merchant_name = pick(query.merchant_name, body.merchant_name);

    let (Some(amount), Some(account_id), Some(merchant_name)) = (amount, account_id, merchant_name)
    else {
        return Err(ApiError::bad_request(
            "Invalid amount, Bakong account ID, or merchant name",
        ));
    };

    info!("Generating QR for account: {}", account_id);

    let request = IssuanceRequest {
        amount: amount.value(),
        account_id,
        merchant_name,
    };
    let result = state.issuer.issue(&request).await?;

    let qr = format!(
        "{}/qr/{}",
        state.base_url(&headers),
        result.bill_number
    );

    Ok(Json(IssuanceResponse {
        qr,
        md5: result.md5,
        tran: result.bill_number,
        merchant_name: result.merchant_name,
        amount: result.amount,
    }))
}

/// Serve a rendered QR image
pub async fn qr_image_handler(
    State(state): State<Arc<AppState>>,
    Path(bill_number): Path<String>,
) -> Result<Response, ApiError> {
    // Anything that is not a valid bill number cannot have an image
    let bill = BillNumber::parse(&bill_number)
        .map_err(|_| Error::NotFound("QR code image not found".to_string()))?;

    let image = state.issuer.retrieve(&bill).await?;

    Ok(([(header::CONTENT_TYPE, "image/png")], image.png).into_response())
}

/// Check transaction status by content hash
pub async fn check_transaction_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    query: Result<Query<CheckTransactionParams>, QueryRejection>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    let query = parse_query(query)?;
    let body: CheckTransactionParams = parse_body(&headers, &body)?;

    let md5 = pick(query.md5, body.md5)
        .ok_or_else(|| ApiError::bad_request("MD5 parameter is required"))?;

    info!("Checking transaction status for md5: {}", md5);

    let status = state.status.check_status(&md5).await?;
    Ok(Json(status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_amount_param() {
        assert_eq!(AmountParam::Number(5.0).value(), 5.0);
        assert_eq!(AmountParam::Text(" 5.00 ".to_string()).value(), 5.0);
        assert!(AmountParam::Text("abc".to_string()).value().is_nan());
        assert!(AmountParam::Text("  ".to_string()).is_blank());
    }

    #[test]
    fn test_pick_prefers_query() {
        assert_eq!(pick(Some("q".into()), Some("b".into())).as_deref(), Some("q"));
        assert_eq!(pick(Some(String::new()), Some("b".into())).as_deref(), Some("b"));
        assert_eq!(pick(None, Some(String::new())), None);
    }

    #[test]
    fn test_server_errors_hide_details() {
        let err: ApiError = Error::Storage("/var/lib/khqr/tran.log: permission denied".to_string()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.message.contains("/var/lib"));

        let err: ApiError = Error::Unauthorized("Unauthorized Bakong account ID".to_string()).into();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
        assert_eq!(err.message, "Unauthorized Bakong account ID");
    }

    fn json_headers(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type.parse().unwrap());
        headers
    }

    #[test]
    fn test_body_params_parse() {
        let headers = json_headers("application/json; charset=utf-8");
        let params: GenerateQrParams = parse_body(
            &headers,
            &Bytes::from_static(
                br#"{"amount": 5, "bakongAccountID": "sotheasok@aclb", "merchantName": "Shop"}"#,
            ),
        )
        .unwrap();
        assert_eq!(params.amount.unwrap().value(), 5.0);
        assert_eq!(params.bakong_account_id.as_deref(), Some("sotheasok@aclb"));

        let empty: GenerateQrParams = parse_body(&headers, &Bytes::new()).unwrap();
        assert!(empty.amount.is_none());

        assert!(parse_body::<GenerateQrParams>(&headers, &Bytes::from_static(b"{")).is_err());
    }

    #[test]
    fn test_non_json_body_ignored() {
        let form = Bytes::from_static(b"amount=5&merchantName=Shop");

        let params: GenerateQrParams =
            parse_body(&json_headers("application/x-www-form-urlencoded"), &form).unwrap();
        assert!(params.amount.is_none());

        let params: GenerateQrParams = parse_body(&HeaderMap::new(), &form).unwrap();
        assert!(params.merchant_name.is_none());
    }
}
