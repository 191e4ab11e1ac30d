//! Serial console access.
//!
//! A console is any [`ConsoleStream`]: a non-blocking character reader plus a writer. [`ConsoleSession`] owns a
//! stream for one subtest and implements the blocking pattern wait on top of it. Production consoles are PTY
//! children (`picocom`, or `console` over SSH); tests use scripted streams.
//!
//! ## Pattern priority
//!
//! An `expect` step waits on the default fail patterns, then the step's fail patterns, then its pass patterns.
//! When several patterns match the buffered output, the one matching earliest wins; ties go to the pattern listed
//! first. The result is tagged with its [`PatternCategory`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod boot;
pub mod pty;

use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::backend::process::Invocation;

/// End-of-transmission control character, sent after every typed character.
pub const EOT: char = '\u{4}';

/// How long the session sleeps when the stream has nothing to read.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Upper bound on characters drained per poll.
const READ_CHUNK: usize = 4096;

/// Unmatched output kept for pattern searches, in bytes. Older output is dropped.
pub const SEARCH_WINDOW: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("timed out after {0:?} waiting for console output")]
    Timeout(Duration),

    #[error("console closed")]
    Closed,

    #[error("could not start console '{command}': {reason}")]
    Spawn { command: String, reason: String },

    #[error("console I/O failed: {0}")]
    Io(String),

    #[error("invalid console pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A bidirectional character stream attached to the target's console.
pub trait ConsoleStream {
    /// Next available character, without blocking. `Ok(None)` means nothing is available yet;
    /// `Err(ConsoleError::Closed)` means nothing ever will be.
    fn try_read(&mut self) -> Result<Option<char>, ConsoleError>;

    fn send(&mut self, text: &str) -> Result<(), ConsoleError>;

    /// Stop the terminal from echoing what is sent.
    fn disable_echo(&mut self) -> Result<(), ConsoleError> {
        Ok(())
    }

    /// Kill the console process. Called at most once.
    fn terminate(&mut self);
}

/// Starts console streams.
pub trait ConsoleSpawner {
    fn spawn(&self, invocation: &Invocation) -> Result<Box<dyn ConsoleStream>, ConsoleError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternCategory {
    /// Harness-wide failure patterns (panics, aborts).
    Default,
    UserFail,
    UserPass,
}

/// Which pattern matched. `index` is relative to the pattern's own category list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub category: PatternCategory,
    pub index: usize,
    /// The matched text.
    pub text: String,
}

/// Ordered patterns awaited together.
#[derive(Debug, Clone)]
pub struct PatternSet {
    patterns: Vec<(PatternCategory, usize, Regex)>,
}

impl PatternSet {
    pub fn for_expect(defaults: &[String], fail: &[String], pass: &[String]) -> Result<Self, ConsoleError> {
        let mut set = Self { patterns: Vec::new() };
        set.extend(PatternCategory::Default, defaults)?;
        set.extend(PatternCategory::UserFail, fail)?;
        set.extend(PatternCategory::UserPass, pass)?;
        Ok(set)
    }

    /// A single pattern matching `text` literally, tagged as a pass.
    pub fn literal(text: &str) -> Result<Self, ConsoleError> {
        let mut set = Self { patterns: Vec::new() };
        set.extend(PatternCategory::UserPass, &[regex::escape(text)])?;
        Ok(set)
    }

    fn extend(&mut self, category: PatternCategory, patterns: &[String]) -> Result<(), ConsoleError> {
        for (index, pattern) in patterns.iter().enumerate() {
            let re = Regex::new(pattern).map_err(|source| ConsoleError::Pattern {
                pattern: pattern.clone(),
                source,
            })?;
            self.patterns.push((category, index, re));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Earliest match in `haystack` and the byte offset where it ends.
    pub fn find(&self, haystack: &str) -> Option<(PatternMatch, usize)> {
        let mut best: Option<(PatternCategory, usize, regex::Match<'_>)> = None;
        for (category, index, re) in &self.patterns {
            let Some(m) = re.find(haystack) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, _, b)| m.start() < b.start()) {
                best = Some((*category, *index, m));
            }
        }

        best.map(|(category, index, m)| {
            (
                PatternMatch {
                    category,
                    index,
                    text: m.as_str().to_string(),
                },
                m.end(),
            )
        })
    }
}

/// A console owned by one subtest run. The stream is terminated on [`ConsoleSession::close`] or drop.
pub struct ConsoleSession {
    stream: Box<dyn ConsoleStream>,
    buffer: String,
    poll_interval: Duration,
    terminated: bool,
}

impl ConsoleSession {
    pub fn new(stream: Box<dyn ConsoleStream>) -> Self {
        Self {
            stream,
            buffer: String::new(),
            poll_interval: POLL_INTERVAL,
            terminated: false,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Output read but not yet consumed by a match.
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Block until one of `patterns` appears or `timeout` elapses. Output up to the end of the match is consumed.
    /// A timeout too large to represent as a deadline waits without one.
    pub fn await_patterns(&mut self, patterns: &PatternSet, timeout: Duration) -> Result<PatternMatch, ConsoleError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut first = true;
        loop {
            let (read, closed) = self.fill()?;
            self.trim_to_window();

            // unchanged output was already searched
            if read > 0 || first {
                if let Some((found, end)) = patterns.find(&self.buffer) {
                    trace!(category = ?found.category, index = found.index, "matched '{}'", found.text);
                    self.buffer.drain(..end);
                    return Ok(found);
                }
            }
            first = false;

            if closed {
                return Err(ConsoleError::Closed);
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                debug!("timed out, last output: {:?}", tail(&self.buffer, 200));
                return Err(ConsoleError::Timeout(timeout));
            }
            if read == 0 {
                thread::sleep(self.poll_interval);
            }
        }
    }

    pub fn send(&mut self, text: &str) -> Result<(), ConsoleError> {
        trace!("send {:?}", text);
        self.stream.send(text)
    }

    pub fn disable_echo(&mut self) -> Result<(), ConsoleError> {
        self.stream.disable_echo()
    }

    /// Terminate the console process. Idempotent.
    pub fn close(&mut self) {
        if !self.terminated {
            self.terminated = true;
            self.stream.terminate();
        }
    }

    /// Drain what the stream has available. Returns the number of characters read and whether the stream closed.
    fn fill(&mut self) -> Result<(usize, bool), ConsoleError> {
        let mut read = 0;
        while read < READ_CHUNK {
            match self.stream.try_read() {
                Ok(Some(c)) => {
                    self.buffer.push(c);
                    read += 1;
                }
                Ok(None) => break,
                Err(ConsoleError::Closed) => return Ok((read, true)),
                Err(e) => return Err(e),
            }
        }
        Ok((read, false))
    }
}

impl ConsoleSession {
    fn trim_to_window(&mut self) {
        if self.buffer.len() <= SEARCH_WINDOW {
            return;
        }
        let mut cut = self.buffer.len() - SEARCH_WINDOW;
        while !self.buffer.is_char_boundary(cut) {
            cut += 1;
        }
        self.buffer.drain(..cut);
    }
}

impl Drop for ConsoleSession {
    fn drop(&mut self) {
        self.close();
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = text.char_indices().nth(count - max_chars).map_or(0, |(i, _)| i);
    &text[skip..]
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConsole;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_earliest_match_wins() {
        let set = PatternSet::for_expect(&strings(&["panic"]), &strings(&["bad"]), &strings(&["good"])).unwrap();
        let (m, end) = set.find("xx good then bad then panic").unwrap();
        assert_eq!(m.category, PatternCategory::UserPass);
        assert_eq!(m.index, 0);
        assert_eq!(end, 7);
    }

    #[test]
    fn test_tie_goes_to_first_listed() {
        let set = PatternSet::for_expect(&strings(&["Panic"]), &[], &strings(&["Pan"])).unwrap();
        let (m, _) = set.find("Panic!").unwrap();
        assert_eq!(m.category, PatternCategory::Default);
    }

    #[test]
    fn test_index_is_per_category() {
        let set = PatternSet::for_expect(&strings(&["a", "b"]), &strings(&["c", "d"]), &strings(&["e", "f"])).unwrap();
        assert_eq!(set.len(), 6);
        let (m, _) = set.find("...d...").unwrap();
        assert_eq!((m.category, m.index), (PatternCategory::UserFail, 1));
        let (m, _) = set.find("...f...").unwrap();
        assert_eq!((m.category, m.index), (PatternCategory::UserPass, 1));
    }

    #[test]
    fn test_patterns_are_regexes() {
        let set = PatternSet::for_expect(&[], &[], &strings(&[r"pid \d+ exited"])).unwrap();
        assert_eq!(set.find("pid 42 exited").unwrap().0.text, "pid 42 exited");
        assert!(matches!(
            PatternSet::for_expect(&[], &[], &strings(&["("])),
            Err(ConsoleError::Pattern { .. })
        ));
    }

    #[test]
    fn test_literal_escapes() {
        let set = PatternSet::literal("Aborted.").unwrap();
        assert!(set.find("AbortedX").is_none());
        assert!(set.find("Aborted.").is_some());
    }

    #[test]
    fn test_await_consumes_through_match() {
        let (console, _handle) = ScriptedConsole::with_output("one two three");
        let mut session = ConsoleSession::new(Box::new(console));
        let two = PatternSet::literal("two").unwrap();
        session.await_patterns(&two, Duration::from_millis(100)).unwrap();
        assert_eq!(session.buffered(), " three");
        // the consumed match is not seen again
        assert!(matches!(
            session.await_patterns(&two, Duration::from_millis(30)),
            Err(ConsoleError::Timeout(_))
        ));
    }

    #[test]
    fn test_await_times_out() {
        let (console, _handle) = ScriptedConsole::with_output("nothing useful");
        let mut session = ConsoleSession::new(Box::new(console));
        let start = Instant::now();
        let err = session
            .await_patterns(&PatternSet::literal("never").unwrap(), Duration::from_millis(50))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_await_on_closed_stream() {
        let (console, handle) = ScriptedConsole::with_output("bye");
        handle.hang_up();
        let mut session = ConsoleSession::new(Box::new(console));
        let err = session
            .await_patterns(&PatternSet::literal("never").unwrap(), Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Closed));
    }

    #[test]
    fn test_await_without_representable_deadline() {
        let (console, _handle) = ScriptedConsole::with_output("ready");
        let mut session = ConsoleSession::new(Box::new(console));
        let found = session
            .await_patterns(&PatternSet::literal("ready").unwrap(), Duration::MAX)
            .unwrap();
        assert_eq!(found.text, "ready");
    }

    #[test]
    fn test_buffer_is_bounded() {
        let noise = "x".repeat(SEARCH_WINDOW * 2);
        let (console, handle) = ScriptedConsole::with_output(&noise);
        let mut session = ConsoleSession::new(Box::new(console));
        let err = session
            .await_patterns(&PatternSet::literal("done").unwrap(), Duration::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Timeout(_)));
        assert_eq!(session.buffered().len(), SEARCH_WINDOW);

        handle.emit("ä done");
        let found = session
            .await_patterns(&PatternSet::literal("done").unwrap(), Duration::from_millis(200))
            .unwrap();
        assert_eq!(found.text, "done");
        assert!(session.buffered().is_empty());
    }

    #[test]
    fn test_close_terminates_once() {
        let (console, handle) = ScriptedConsole::new();
        let mut session = ConsoleSession::new(Box::new(console));
        session.close();
        drop(session);
        assert_eq!(handle.terminate_count(), 1);
    }

    #[test]
    fn test_tail_keeps_last_chars() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("ab", 3), "ab");
        assert_eq!(tail("äöü", 2), "öü");
    }
}
