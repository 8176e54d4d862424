#![allow(dead_code)]

use std::sync::Arc;

use brrtframe::Hook;
use parking_lot::Mutex;

/// Shared, ordered log of callback invocations.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn on_request(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::on_request(move |_req, _reply| {
            rec.push(label);
            async { Ok(()) }
        })
    }

    pub fn pre_parsing(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::pre_parsing(move |_req, _reply| {
            rec.push(label);
            async { Ok(()) }
        })
    }

    pub fn pre_validation(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::pre_validation(move |_req, _reply| {
            rec.push(label);
            async { Ok(()) }
        })
    }

    pub fn pre_handler(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::pre_handler(move |_req, _reply| {
            rec.push(label);
            async { Ok(()) }
        })
    }

    pub fn pre_serialization(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::pre_serialization(move |_req, _reply, payload| {
            rec.push(label);
            async move { Ok(payload) }
        })
    }

    pub fn on_send(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::on_send(move |_req, _reply, body| {
            rec.push(label);
            async move { Ok(body) }
        })
    }

    pub fn on_error(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::on_error(move |_req, _reply, _err| {
            rec.push(label);
            async { Ok(()) }
        })
    }

    pub fn on_close(&self, label: &'static str) -> Hook {
        let rec = self.clone();
        Hook::on_close(move |_instance| {
            rec.push(label);
            async { Ok(()) }
        })
    }
}
