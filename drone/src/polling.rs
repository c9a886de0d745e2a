use anyhow::{Context, Result};
use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io::ErrorKind;
use std::time::Duration;

pub struct Poller {
    inner: Poll,
    events: Events,
}

impl Poller {
    pub fn new(capacity: usize) -> Result<Self> {
        let inner = Poll::new().context("Error creating poller")?;
        let events = Events::with_capacity(capacity);
        Ok(Self {
            inner,
            events,
        })
    }

    pub fn register<S: Source + ?Sized>(&mut self, source: &mut S, token: Token, interest: Interest) -> Result<()> {
        self.inner.registry().register(source, token, interest).context("Error registering event")
    }

    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<&Events> {
        match self.inner.poll(&mut self.events, timeout) {
            // A signal woke the poller up
            Err(e) if e.kind() == ErrorKind::Interrupted => self.events.clear(),
            result => result.context("Error polling for events")?,
        }
        Ok(&self.events)
    }
}
