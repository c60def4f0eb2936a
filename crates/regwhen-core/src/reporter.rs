/// Sink for progress and non-fatal diagnostics. The engine never prints.
pub trait Reporter {
    fn info(&mut self, msg: &str);
    fn warn(&mut self, msg: &str);
    fn error(&mut self, msg: &str);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn info(&mut self, _msg: &str) {}
    fn warn(&mut self, _msg: &str) {}
    fn error(&mut self, _msg: &str) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Level {
    Info,
    Warn,
    Error,
}

/// Buffers messages on a worker thread so they can be replayed, in order,
/// to the caller's reporter after the worker joins.
#[derive(Debug, Default)]
pub(crate) struct BufferedReporter {
    messages: Vec<(Level, String)>,
}

impl BufferedReporter {
    pub(crate) fn replay(self, reporter: &mut dyn Reporter) {
        for (level, msg) in self.messages {
            match level {
                Level::Info => reporter.info(&msg),
                Level::Warn => reporter.warn(&msg),
                Level::Error => reporter.error(&msg),
            }
        }
    }
}

impl Reporter for BufferedReporter {
    fn info(&mut self, msg: &str) {
        self.messages.push((Level::Info, msg.to_string()));
    }

    fn warn(&mut self, msg: &str) {
        self.messages.push((Level::Warn, msg.to_string()));
    }

    fn error(&mut self, msg: &str) {
        self.messages.push((Level::Error, msg.to_string()));
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct CollectingReporter {
    pub(crate) infos: Vec<String>,
    pub(crate) warns: Vec<String>,
    pub(crate) errors: Vec<String>,
}

#[cfg(test)]
impl Reporter for CollectingReporter {
    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}
