use std::time::Duration;

/// Blocking pause between retries and polls.
pub trait Sleeper {
  fn sleep(&self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
  fn sleep(&self, duration: Duration) {
    std::thread::sleep(duration);
  }
}

pub fn configure_from_args(args: &[String]) -> RunOptions {
  RunOptions {
    dry_run: args.iter().any(|a| a == "--dry-run"),
    skip_tools: args.iter().any(|a| a == "--skip-tools"),
    no_watch: args.iter().any(|a| a == "--no-watch"),
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
  pub dry_run: bool,
  pub skip_tools: bool,
  pub no_watch: bool,
}

#[cfg(test)]
pub(crate) mod fake {
  use super::Sleeper;
  use std::cell::RefCell;
  use std::time::Duration;

  /// Records requested pauses instead of blocking.
  #[derive(Debug, Default)]
  pub struct RecordingSleeper {
    slept: RefCell<Vec<Duration>>,
  }

  impl RecordingSleeper {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn calls(&self) -> Vec<Duration> {
      self.slept.borrow().clone()
    }

    pub fn total(&self) -> Duration {
      self.slept.borrow().iter().sum()
    }
  }

  impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
      self.slept.borrow_mut().push(duration);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::fake::RecordingSleeper;
  use super::*;

  #[test]
  fn flags_are_independent() {
    let args: Vec<String> = ["agent-setup", "--dry-run", "--no-watch"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    let opts = configure_from_args(&args);
    assert!(opts.dry_run);
    assert!(!opts.skip_tools);
    assert!(opts.no_watch);
  }

  #[test]
  fn recording_sleeper_sums_pauses() {
    let s = RecordingSleeper::new();
    s.sleep(Duration::from_secs(1));
    s.sleep(Duration::from_secs(2));
    assert_eq!(s.calls().len(), 2);
    assert_eq!(s.total(), Duration::from_secs(3));
  }
}
