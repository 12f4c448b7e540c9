//! The terminal stage: one request/response exchange on the wire.

use http::StatusCode;
use log::debug;

use crate::chain::{Chain, Interceptor};
use crate::connection::http1::{Http1Codec, RawResponse};
use crate::ext::StatusExt;
use crate::request::Request;
use crate::response::Response;
use crate::util::now_millis;
use crate::Error;

pub(crate) struct CallServer;

impl Interceptor for CallServer {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error> {
        let request = chain.request().clone();
        let mut exchange = chain
            .take_exchange()
            .expect("exchange established by the connect stage");
        let mut codec = exchange.take_codec();

        let sent_at = now_millis();

        let early = match write_request(&mut codec, &request) {
            Ok(v) => v,
            Err(e) => {
                codec.abandon();
                return Err(e);
            }
        };

        let raw = match read_final_response(&mut codec, early) {
            Ok(v) => v,
            Err(e) => {
                codec.abandon();
                return Err(e);
            }
        };
        let received_at = now_millis();

        if let Some(reason) = codec.close_reason() {
            debug!("exchange completed, connection closing: {}", reason);
        }

        let body = codec.open_response_body(request.method(), &raw)?;

        Ok(Response::builder()
            .request(request)
            .status(raw.status)
            .message(&raw.message)
            .version(raw.version)
            .headers(raw.headers)
            .body(Some(body))
            .sent_request_at_millis(sent_at)
            .received_response_at_millis(received_at)
            .build())
    }
}

/// Emit headers and body. With `Expect: 100-continue` the headers are
/// flushed alone and the body waits for the server's verdict; a final
/// response in place of the 100 aborts the body and is returned for the
/// read phase.
fn write_request(codec: &mut Http1Codec, request: &Request) -> Result<Option<RawResponse>, Error> {
    codec.write_request_headers(request)?;

    let mut early = None;
    if let Some(body) = request.body() {
        if expects_continue(request) {
            codec.finish_request()?;
            match codec.read_interim_response()? {
                Some(raw) if raw.status == StatusCode::CONTINUE => {
                    debug!("got 100-continue, sending body");
                    codec.write_request_body(body)?;
                }
                Some(raw) if raw.status.is_informational() => {
                    // 102/103 are not an answer to the expectation.
                    codec.write_request_body(body)?;
                    early = Some(raw);
                }
                Some(raw) => {
                    debug!("expected 100-continue, got {}; body withheld", raw.status);
                    codec.note_not_100();
                    early = Some(raw);
                }
                // Server stayed silent past the deadline.
                None => codec.write_request_body(body)?,
            }
        } else {
            codec.write_request_body(body)?;
        }
    }
    codec.finish_request()?;
    Ok(early)
}

/// Read status lines until a non-interim response. An unexpected 100 (or
/// 102/103) is consumed and reading continues; 101 is final so protocol
/// upgrades can take the connection.
fn read_final_response(
    codec: &mut Http1Codec,
    early: Option<RawResponse>,
) -> Result<RawResponse, Error> {
    let mut raw = match early {
        Some(v) => v,
        None => codec.read_response_headers()?,
    };
    while raw.status.is_informational() && raw.status != StatusCode::SWITCHING_PROTOCOLS {
        debug!("discarding interim response {}", raw.status);
        raw = codec.read_response_headers()?;
    }
    Ok(raw)
}

fn expects_continue(request: &Request) -> bool {
    request
        .header("expect")
        .map(|v| v.eq_ignore_ascii_case("100-continue"))
        .unwrap_or(false)
}
