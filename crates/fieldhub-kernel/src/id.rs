//! Sequential log labels for devices configured without an explicit id.

/// Hands out `"{prefix}-1"`, `"{prefix}-2"`, … in order.
///
/// # Example
///
/// ```
/// use fieldhub_kernel::id::IdGenerator;
///
/// let mut ids = IdGenerator::new();
/// assert_eq!(ids.next_id("device"), "device-1");
/// assert_eq!(ids.next_id("device"), "device-2");
/// ```
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: u64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The counter is shared across prefixes.
    pub fn next_id(&mut self, prefix: &str) -> String {
        self.last += 1;
        format!("{prefix}-{}", self.last)
    }
}
