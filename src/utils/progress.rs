//! Progress reporting and cooperative cancellation

/// Receiver of coarse single-line status strings.
///
/// Long operations call `report` at milestones and poll `is_cancelled`
/// between outer iterations.
pub trait ProgressSink {
    fn report(&mut self, message: &str);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Discards every message
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn report(&mut self, _message: &str) {}
}

/// Forwards messages to the `log` facade at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, message: &str) {
        log::info!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counting(usize);

    impl ProgressSink for Counting {
        fn report(&mut self, _message: &str) {
            self.0 += 1;
        }
    }

    #[test]
    fn test_default_sink_never_cancels() {
        let mut sink = Counting(0);
        sink.report("one");
        sink.report("two");
        assert_eq!(sink.0, 2);
        assert!(!sink.is_cancelled());
        assert!(!NullProgress.is_cancelled());
    }
}
