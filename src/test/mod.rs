//! Cross-module scenario tests against scripted local servers.

use std::sync::mpsc;

use crate::call::Callback;
use crate::response::Response;
use crate::{Call, Error};

mod caching;

pub(crate) use server::TestServer;

/// Callback delivering the outcome over a channel.
pub(crate) struct ChannelCallback(pub mpsc::Sender<Result<Response, Error>>);

impl Callback for ChannelCallback {
    fn on_response(self: Box<Self>, _call: Call, response: Response) {
        let _ = self.0.send(Ok(response));
    }

    fn on_failure(self: Box<Self>, _call: Call, error: Error) {
        let _ = self.0.send(Err(error));
    }
}
