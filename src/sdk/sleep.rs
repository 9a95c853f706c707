use std::time::Duration;
use tokio::sync::Notify;

/// How an [`InterruptableSleep`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
	Elapsed,
	Interrupted,
}

/// Timer that another task can cut short.
///
/// An interrupt arriving while nobody sleeps is remembered and ends the
/// next sleep immediately.
#[derive(Debug, Default)]
pub struct InterruptableSleep {
	notify: Notify,
}

impl InterruptableSleep {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn sleep(&self, duration: Duration) -> SleepOutcome {
		tokio::select! {
			_ = tokio::time::sleep(duration) => SleepOutcome::Elapsed,
			_ = self.notify.notified() => SleepOutcome::Interrupted,
		}
	}

	pub fn interrupt(&self) {
		self.notify.notify_one();
	}
}
