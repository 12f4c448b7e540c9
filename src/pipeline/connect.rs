//! Connection acquisition.

use crate::chain::{Chain, Exchange, Interceptor};
use crate::connection::http1::Http1Codec;
use crate::response::Response;
use crate::Error;

/// Turns the retry stage's resource claim into a live codec and
/// connection for the stages below. Touches no headers.
pub(crate) struct ConnectStage;

impl Interceptor for ConnectStage {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error> {
        let allocation = chain
            .allocation()
            .expect("allocation established by the retry stage");

        let connection = allocation.acquire()?;
        chain.call().listener().connection_acquired(chain.call());

        let codec = Http1Codec::new(connection, allocation);
        chain.set_exchange(Exchange::new(codec));

        let request = chain.request().clone();
        chain.proceed(request)
    }
}
