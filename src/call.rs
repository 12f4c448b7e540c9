//! The one-shot execution binding of (client, request).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use log::debug;

use crate::chain::{Chain, Interceptor};
use crate::client::Client;
use crate::connection::StreamAllocation;
use crate::dispatcher::Dispatcher;
use crate::listener::EventListener;
use crate::pipeline::{Bridge, CacheStage, CallServer, ConnectStage, RetryAndFollowUp};
use crate::request::Request;
use crate::response::Response;
use crate::Error;

/// Receives the outcome of an asynchronous call, exactly once.
pub trait Callback: Send {
    fn on_response(self: Box<Self>, call: Call, response: Response);
    fn on_failure(self: Box<Self>, call: Call, error: Error);
}

pub(crate) struct CallInner {
    client: Client,
    original_request: Request,
    for_web_socket: bool,
    executed: Mutex<bool>,
    canceled: AtomicBool,
    allocation: Mutex<Option<Arc<StreamAllocation>>>,
    listener: OnceLock<Arc<dyn EventListener>>,
}

/// A request bound to a client, ready to run at most once.
///
/// Cloning a `Call` yields another handle to the *same* execution: the
/// executed flag and cancel latch are shared. To run the same request
/// again, use [`duplicate()`](Call::duplicate), which resets nothing but
/// shares nothing either.
#[derive(Clone)]
pub struct Call {
    inner: Arc<CallInner>,
}

impl Call {
    pub(crate) fn new(client: Client, request: Request, for_web_socket: bool) -> Call {
        let call = Call {
            inner: Arc::new(CallInner {
                client,
                original_request: request,
                for_web_socket,
                executed: Mutex::new(false),
                canceled: AtomicBool::new(false),
                allocation: Mutex::new(None),
                listener: OnceLock::new(),
            }),
        };
        // The listener is created after the call so the factory can retain
        // the call; from here on the reference is immutable.
        let listener = (call.inner.client.inner.event_listener_factory)(&call);
        let _ = call.inner.listener.set(listener);
        call
    }

    /// The application's original request, unadulterated by redirects or
    /// auth headers.
    pub fn request(&self) -> &Request {
        &self.inner.original_request
    }

    pub(crate) fn client(&self) -> &Client {
        &self.inner.client
    }

    pub(crate) fn listener(&self) -> Arc<dyn EventListener> {
        self.inner
            .listener
            .get()
            .expect("listener attached at construction")
            .clone()
    }

    fn dispatcher(&self) -> Arc<Dispatcher> {
        self.inner.client.inner.dispatcher.clone()
    }

    fn mark_executed(&self) -> Result<(), Error> {
        let mut executed = self.inner.executed.lock().expect("call lock");
        if *executed {
            return Err(Error::AlreadyExecuted);
        }
        *executed = true;
        Ok(())
    }

    /// Run the request on the calling thread and block for the response.
    pub fn execute(&self) -> Result<Response, Error> {
        self.mark_executed()?;
        self.listener().call_start(self);

        let dispatcher = self.dispatcher();
        dispatcher.executed(self);
        let _finish = FinishHook {
            dispatcher: &dispatcher,
            call: self,
            sync: true,
        };

        let result = self.run_pipeline();
        match &result {
            Ok(_) => self.listener().call_end(self),
            Err(e) => self.listener().call_failed(self, e),
        }
        result
    }

    /// Hand the request to the dispatcher; `callback` fires exactly once
    /// on a dispatcher thread.
    pub fn enqueue(&self, callback: Box<dyn Callback>) -> Result<(), Error> {
        self.mark_executed()?;
        self.listener().call_start(self);
        self.dispatcher().enqueue(AsyncTask {
            call: self.clone(),
            callback,
        });
        Ok(())
    }

    /// Cancel the call. Idempotent, safe from any thread. In-flight I/O
    /// unblocks promptly because the underlying socket is shut down.
    pub fn cancel(&self) {
        if self.inner.canceled.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("cancel call to {}", self.inner.original_request.url());
        if let Some(allocation) = self.inner.allocation.lock().expect("call lock").as_ref() {
            allocation.cancel();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    pub fn is_executed(&self) -> bool {
        *self.inner.executed.lock().expect("call lock")
    }

    /// A fresh, unexecuted call with the same client, request and
    /// websocket flag.
    pub fn duplicate(&self) -> Call {
        Call::new(
            self.inner.client.clone(),
            self.inner.original_request.clone(),
            self.inner.for_web_socket,
        )
    }

    pub(crate) fn same_call(&self, other: &Call) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn tag_matches(&self, tag: &Arc<dyn std::any::Any + Send + Sync>) -> bool {
        match self.inner.original_request.tag() {
            Some(own) => Arc::ptr_eq(own, tag),
            None => false,
        }
    }

    /// The retry stage parks its per-hop resource claim here so `cancel`
    /// can reach the live socket.
    pub(crate) fn register_allocation(&self, allocation: Arc<StreamAllocation>) {
        *self.inner.allocation.lock().expect("call lock") = Some(allocation.clone());
        if self.is_canceled() {
            allocation.cancel();
        }
    }

    /// Assemble the interceptor stack and run it.
    fn run_pipeline(&self) -> Result<Response, Error> {
        let client = &self.inner.client.inner;
        let mut interceptors: Vec<Arc<dyn Interceptor>> = Vec::new();
        interceptors.extend(client.interceptors.iter().cloned());
        interceptors.push(Arc::new(RetryAndFollowUp));
        interceptors.push(Arc::new(Bridge));
        interceptors.push(Arc::new(CacheStage));
        interceptors.push(Arc::new(ConnectStage));
        if !self.inner.for_web_socket {
            interceptors.extend(client.network_interceptors.iter().cloned());
        }
        interceptors.push(Arc::new(CallServer));

        let mut chain = Chain::new(&interceptors, self, self.inner.original_request.clone());
        chain.proceed(self.inner.original_request.clone())
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Call({} {}{})",
            self.inner.original_request.method(),
            self.inner.original_request.url(),
            if self.is_canceled() { ", canceled" } else { "" }
        )
    }
}

/// An enqueued call plus its callback, run on a dispatcher thread.
pub(crate) struct AsyncTask {
    call: Call,
    callback: Box<dyn Callback>,
}

impl AsyncTask {
    pub(crate) fn call(&self) -> &Call {
        &self.call
    }

    pub(crate) fn host(&self) -> String {
        self.call
            .request()
            .url()
            .host()
            .unwrap_or("")
            .to_ascii_lowercase()
    }

    pub(crate) fn run(self) {
        let AsyncTask { call, callback } = self;
        let dispatcher = call.dispatcher();
        let _finish = FinishHook {
            dispatcher: &dispatcher,
            call: &call,
            sync: false,
        };

        match call.run_pipeline() {
            Ok(response) => {
                // Cancellation observed after the network won the race
                // still reports a canceled call.
                if call.is_canceled() {
                    let error = Error::Canceled;
                    call.listener().call_failed(&call, &error);
                    callback.on_failure(call.clone(), error);
                } else {
                    call.listener().call_end(&call);
                    callback.on_response(call.clone(), response);
                }
            }
            Err(error) => {
                call.listener().call_failed(&call, &error);
                callback.on_failure(call.clone(), error);
            }
        }
    }
}

/// Guarantees the dispatcher's finished hook on every exit path.
struct FinishHook<'a> {
    dispatcher: &'a Arc<Dispatcher>,
    call: &'a Call,
    sync: bool,
}

impl Drop for FinishHook<'_> {
    fn drop(&mut self) {
        if self.sync {
            self.dispatcher.finished_sync(self.call);
        } else {
            self.dispatcher.finished_async(self.call);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_is_unexecuted_and_unshared() {
        let client = Client::new();
        let call = client.call(Request::get("http://x.test/").build().unwrap());
        call.cancel();
        assert!(call.is_canceled());

        let duplicate = call.duplicate();
        assert!(!duplicate.is_canceled());
        assert!(!duplicate.is_executed());
        assert_eq!(duplicate.request().url(), call.request().url());
    }

    #[test]
    fn clone_shares_execution_state() {
        let client = Client::new();
        let call = client.call(Request::get("http://x.test/").build().unwrap());
        let handle = call.clone();
        call.cancel();
        assert!(handle.is_canceled());
        assert!(call.same_call(&handle));
    }
}
