use crate::diagnostics::{self, DIAGNOSTIC_BODY_LIMIT, Diagnostics, keys};
use crate::error::RemoteError;
use bytes::{Bytes, BytesMut};
use http::{Response, StatusCode};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

/// Type alias for the boxed response body that supports decompression.
///
/// Holds either a raw or a decompressed (gzip/br/deflate) body; the
/// decompression layer sits below this type.
pub type ResponseBody =
    http_body_util::combinators::BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Accepted status range is `[200, 300)`. Redirects are not followed, so a
/// 3xx is a failure like any other non-2xx status.
#[must_use]
pub fn is_success_status(status: StatusCode) -> bool {
    (200..300).contains(&status.as_u16())
}

/// Check the status and read the body of `response`.
///
/// Records `status` and, on success, `response_length` into `diag`. For a
/// rejected status the first [`DIAGNOSTIC_BODY_LIMIT`] bytes are captured as
/// the error preview.
///
/// # Errors
///
/// Returns `RemoteError::BadStatus` for a status outside `[200, 300)`,
/// `RemoteError::BodyTooLarge` past `max_body_size`, or
/// `RemoteError::Transport` if the body stream fails.
pub async fn checked_body(
    response: Response<ResponseBody>,
    max_body_size: usize,
    diag: &mut Diagnostics,
) -> Result<(StatusCode, Bytes), RemoteError> {
    let (parts, body) = response.into_parts();
    let status = parts.status;
    diag.insert(keys::STATUS, status.as_u16());

    if !is_success_status(status) {
        let (preview, more) = read_prefix(body, max_body_size.min(DIAGNOSTIC_BODY_LIMIT)).await?;
        diag.capture_preview(&preview, more);
        return Err(RemoteError::BadStatus {
            status,
            body_preview: diagnostics::bounded_text(&preview, DIAGNOSTIC_BODY_LIMIT),
        });
    }

    let bytes = read_limited(body, max_body_size).await?;
    diag.insert(keys::RESPONSE_LENGTH, bytes.len());
    Ok((status, bytes))
}

/// Decode a JSON body, capturing a bounded copy of it on failure.
///
/// # Errors
///
/// Returns `RemoteError::Decode` carrying `status`.
pub fn decode_json<T: DeserializeOwned>(
    status: StatusCode,
    body: &[u8],
    diag: &mut Diagnostics,
) -> Result<T, RemoteError> {
    serde_json::from_slice(body).map_err(|source| {
        diag.capture_body(body);
        RemoteError::Decode { status, source }
    })
}

/// Read the whole body, failing once more than `limit` bytes arrive.
///
/// The limit applies to decompressed bytes.
async fn read_limited(body: ResponseBody, limit: usize) -> Result<Bytes, RemoteError> {
    let mut collected = BytesMut::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(RemoteError::Transport)?;
        if let Some(chunk) = frame.data_ref() {
            let actual = collected.len() + chunk.len();
            if actual > limit {
                return Err(RemoteError::BodyTooLarge { limit, actual });
            }
            collected.extend_from_slice(chunk);
        }
    }

    Ok(collected.freeze())
}

/// Read at most `limit` bytes and drop the rest of the body.
///
/// The flag is `true` when data followed the returned prefix.
async fn read_prefix(body: ResponseBody, limit: usize) -> Result<(Bytes, bool), RemoteError> {
    let mut collected = BytesMut::new();
    let mut body = std::pin::pin!(body);

    while let Some(frame) = body.frame().await {
        let frame = frame.map_err(RemoteError::Transport)?;
        let Some(chunk) = frame.data_ref() else {
            continue;
        };
        let room = limit - collected.len();
        if chunk.len() > room {
            collected.extend_from_slice(&chunk[..room]);
            return Ok((collected.freeze(), true));
        }
        collected.extend_from_slice(chunk);
    }

    Ok((collected.freeze(), false))
}
