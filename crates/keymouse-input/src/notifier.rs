//! Ordered, asynchronous observer dispatch.
//!
//! Notifications are queued on an unbounded channel and delivered on a
//! dedicated thread, so observers never run under the engine lock and always
//! see transitions in the order they happened.

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use crossbeam_channel::{Receiver, Sender};
use log::debug;
use parking_lot::Mutex;

type Observer<T> = Arc<dyn Fn(T) + Send + Sync>;

pub struct Notifier<T: Copy + Send + 'static> {
    tx: Sender<T>,
    observers: Arc<Mutex<Vec<Observer<T>>>>,
}

impl<T: Copy + Send + 'static> Notifier<T> {
    pub fn spawn(name: &str) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let observers: Arc<Mutex<Vec<Observer<T>>>> = Arc::new(Mutex::new(Vec::new()));
        let worker_observers = observers.clone();
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || deliver(rx, worker_observers))?;
        Ok(Self { tx, observers })
    }

    pub fn subscribe(&self, observer: impl Fn(T) + Send + Sync + 'static) {
        self.observers.lock().push(Arc::new(observer));
    }

    /// Queue `value` for every observer. Never blocks.
    pub fn notify(&self, value: T) {
        if self.tx.send(value).is_err() {
            debug!("Notifier thread gone, dropping notification");
        }
    }
}

// The thread exits once the notifier (and with it the sender) is dropped.
fn deliver<T: Copy>(rx: Receiver<T>, observers: Arc<Mutex<Vec<Observer<T>>>>) {
    for value in rx {
        // Called outside the lock so an observer may subscribe another.
        let current: Vec<Observer<T>> = observers.lock().clone();
        for observer in current {
            observer(value);
        }
    }
}
