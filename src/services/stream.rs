use anyhow::Result;
use futures_util::StreamExt;
use log::info;

use crate::services::llm::TokenStream;
use crate::services::pause::PauseGate;

/// Accumulates a token stream into one string.
///
/// The gate is checked once per received fragment, before its text is used,
/// so a pause takes effect on the next token boundary. `on_increment` sees
/// the whole text so far after every non-empty token. An empty result is not
/// an error; the caller decides what "nothing generated" means.
pub async fn drain<F>(
    mut stream: TokenStream,
    gate: &PauseGate,
    log_every: usize,
    mut on_increment: F,
) -> Result<String>
where
    F: FnMut(&str),
{
    let mut text = String::new();
    let mut tokens = 0usize;

    while let Some(fragment) = stream.next().await {
        gate.await_resume().await;

        let fragment = fragment?;
        let Some(token) = fragment.text.filter(|t| !t.is_empty()) else {
            continue;
        };

        text.push_str(&token);
        tokens += 1;
        on_increment(&text);

        if log_every > 0 && tokens % log_every == 0 {
            info!("Received {} tokens", tokens);
        }
    }

    Ok(text)
}

/// Turns full-text snapshots back into deltas for consumers that only want
/// what is new.
#[derive(Debug, Default)]
pub struct IncrementTracker {
    seen: usize,
}

impl IncrementTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The unseen suffix of `full`, or `None` when there is nothing new.
    /// A snapshot shorter than what was already seen starts a new stream.
    pub fn observe<'a>(&mut self, full: &'a str) -> Option<&'a str> {
        if full.len() < self.seen || !full.is_char_boundary(self.seen) {
            self.seen = 0;
        }
        if full.len() == self.seen {
            return None;
        }
        let delta = &full[self.seen..];
        self.seen = full.len();
        Some(delta)
    }

    pub fn reset(&mut self) {
        self.seen = 0;
    }
}
