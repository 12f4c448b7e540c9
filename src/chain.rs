//! The interceptor contract and the chain that drives it.

use std::sync::Arc;
use std::time::Duration;

use crate::call::Call;
use crate::connection::http1::Http1Codec;
use crate::connection::{Address, StreamAllocation};
use crate::request::Request;
use crate::response::Response;
use crate::Error;

/// A single stage of the request pipeline.
///
/// An interceptor may rewrite the request before handing it on with
/// [`Chain::proceed`], rewrite the response on the way back, short-circuit
/// with a synthesized response without proceeding at all, or fail. A chain
/// instance allows exactly one `proceed`; the terminal stage gets a chain
/// on which `proceed` is an error.
pub trait Interceptor: Send + Sync {
    fn intercept(&self, chain: &mut Chain<'_>) -> Result<Response, Error>;
}

/// The transport state for one wire exchange: the codec with its acquired
/// connection. Created by the connect stage, consumed by the terminal
/// stage. Dropping an unconsumed exchange tears the connection down.
pub(crate) struct Exchange {
    codec: Option<Http1Codec>,
}

impl Exchange {
    pub(crate) fn new(codec: Http1Codec) -> Exchange {
        Exchange { codec: Some(codec) }
    }

    pub(crate) fn take_codec(&mut self) -> Http1Codec {
        self.codec.take().expect("exchange codec taken once")
    }

    fn address(&self) -> Option<&Address> {
        self.codec.as_ref().and_then(|c| c.address())
    }
}

impl Drop for Exchange {
    fn drop(&mut self) {
        if let Some(codec) = self.codec.take() {
            codec.abandon();
        }
    }
}

/// The remaining tail of the pipeline plus the current request.
pub struct Chain<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    index: usize,
    request: Request,
    call: &'a Call,
    allocation: Option<Arc<StreamAllocation>>,
    exchange: Option<Exchange>,
    proceed_count: u32,
}

impl<'a> Chain<'a> {
    pub(crate) fn new(
        interceptors: &'a [Arc<dyn Interceptor>],
        call: &'a Call,
        request: Request,
    ) -> Chain<'a> {
        Chain {
            interceptors,
            index: 0,
            request,
            call,
            allocation: None,
            exchange: None,
            proceed_count: 0,
        }
    }

    /// The request as this stage sees it.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The call this chain belongs to.
    pub fn call(&self) -> &Call {
        self.call
    }

    /// Where the held connection goes, if this stage runs below connect.
    pub fn connection(&self) -> Option<&Address> {
        self.exchange.as_ref().and_then(|e| e.address())
    }

    pub fn connect_timeout(&self) -> Duration {
        self.call.client().connect_timeout()
    }

    pub fn read_timeout(&self) -> Duration {
        self.call.client().read_timeout()
    }

    pub fn write_timeout(&self) -> Duration {
        self.call.client().write_timeout()
    }

    /// Hand `request` to the next stage and block for its response.
    ///
    /// Errors with [`Error::ChainProceedTwice`] on re-entry: each chain
    /// instance permits exactly one proceed.
    pub fn proceed(&mut self, request: Request) -> Result<Response, Error> {
        self.proceed_count += 1;
        if self.proceed_count > 1 {
            return Err(Error::ChainProceedTwice);
        }
        self.proceed_inner(request)
    }

    /// The retry stage re-enters the tail once per attempt, so its chain
    /// is exempt from the one-proceed rule. Everything else goes through
    /// [`proceed`](Chain::proceed).
    pub(crate) fn proceed_internal(&mut self, request: Request) -> Result<Response, Error> {
        self.proceed_inner(request)
    }

    fn proceed_inner(&mut self, request: Request) -> Result<Response, Error> {
        if self.index >= self.interceptors.len() {
            return Err(Error::ChainExhausted);
        }
        if self.call.is_canceled() {
            return Err(Error::Canceled);
        }
        // Below connect, the exchange already points at a host; a network
        // interceptor must not redirect elsewhere.
        if let Some(held) = self.exchange.as_ref().and_then(|e| e.address()) {
            let target = Address::from_url(request.url())?;
            if *held != target {
                return Err(Error::ChainHostChanged);
            }
        }

        let interceptor = self.interceptors[self.index].clone();
        let mut next = Chain {
            interceptors: self.interceptors,
            index: self.index + 1,
            request,
            call: self.call,
            allocation: self.allocation.clone(),
            exchange: self.exchange.take(),
            proceed_count: 0,
        };
        let result = interceptor.intercept(&mut next);
        // Whatever transport state the stage did not consume comes back.
        self.exchange = next.exchange.take();

        let response = result?;
        if response.body().is_none() {
            return Err(Error::Protocol("interceptor returned a response without a body"));
        }
        Ok(response)
    }

    pub(crate) fn set_allocation(&mut self, allocation: Arc<StreamAllocation>) {
        self.allocation = Some(allocation);
    }

    pub(crate) fn allocation(&self) -> Option<Arc<StreamAllocation>> {
        self.allocation.clone()
    }

    pub(crate) fn set_exchange(&mut self, exchange: Exchange) {
        self.exchange = Some(exchange);
    }

    pub(crate) fn take_exchange(&mut self) -> Option<Exchange> {
        self.exchange.take()
    }
}
