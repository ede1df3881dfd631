//! Structured telemetry pipeline for uplink anomalies.
//!
//! Anomalies in the command pipeline (a third source pressing an already double-held
//! button, a batched frame that would overflow its count field, a broken ring invariant)
//! are reported as structured [`UplinkViolation`]s instead of free-form log lines. They can
//! be:
//!
//! - Logged via tracing (default behavior)
//! - Collected programmatically for testing
//! - Sent to custom observers (metrics, alerting, etc.)
//!
//! # Example
//!
//! ```
//! use cmd_uplink::telemetry::{CollectingObserver, ViolationKind};
//! use std::sync::Arc;
//!
//! // Create a collecting observer for tests
//! let observer = Arc::new(CollectingObserver::new());
//!
//! // Check violations after some operations
//! assert!(!observer.has_violation(ViolationKind::InputTracking));
//! ```

use crate::{CommandNumber, Sequence};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Severity of an uplink violation.
///
/// Severities are ordered from least to most severe, allowing filtering
/// and comparison operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    /// Unexpected but recoverable - operation continued with fallback.
    ///
    /// Example: a third physical source pressed an action already held by two.
    Warning,
    /// Serious issue - operation may have degraded behavior.
    ///
    /// Example: a batched frame was replaced with an empty send.
    Error,
    /// Critical invariant broken - state may be corrupted.
    Critical,
}

impl ViolationSeverity {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categories of uplink violations, one per pipeline stage.
///
/// # Forward Compatibility
///
/// This enum is marked `#[non_exhaustive]` because new violation categories
/// may be added in future versions. Always include a wildcard arm when matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ViolationKind {
    /// Button tracking anomaly.
    ///
    /// Examples:
    /// - Third concurrent source for one action
    InputTracking,
    /// Command assembly anomaly.
    ///
    /// Examples:
    /// - Frame duration clamped because it was unreasonable
    CommandAssembly,
    /// Command or send history anomaly.
    ///
    /// Examples:
    /// - Reading a command that has already been overwritten
    CommandHistory,
    /// Frame encoding failed.
    ///
    /// Examples:
    /// - Per-slot command count exceeds the 5-bit field
    Encoding,
    /// Transmission bookkeeping anomaly.
    ///
    /// Examples:
    /// - Fatal transport condition that tore the connection down
    Transmission,
    /// Configuration constraint violated.
    ///
    /// Examples:
    /// - Value clamped into range at point of use
    Configuration,
    /// Internal logic error (should never happen).
    ///
    /// These violations indicate bugs in the library itself.
    InternalError,
    /// Runtime invariant check failed.
    ///
    /// Only checked in debug builds or when `paranoid` feature is enabled.
    Invariant,
}

impl ViolationKind {
    /// Returns a string representation suitable for logging/metrics labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InputTracking => "input_tracking",
            Self::CommandAssembly => "command_assembly",
            Self::CommandHistory => "command_history",
            Self::Encoding => "encoding",
            Self::Transmission => "transmission",
            Self::Configuration => "configuration",
            Self::InternalError => "internal_error",
            Self::Invariant => "invariant",
        }
    }
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recorded uplink violation.
///
/// Contains all relevant context for diagnosing and responding to
/// a violation of expected behavior or invariants.
///
/// # Example
///
/// ```
/// use cmd_uplink::telemetry::{UplinkViolation, ViolationSeverity, ViolationKind};
/// use cmd_uplink::{CommandNumber, Sequence};
///
/// let violation = UplinkViolation::new(
///     ViolationSeverity::Error,
///     ViolationKind::Encoding,
///     "slot command count overflow",
///     "transmitter.rs:42",
/// )
/// .with_command(CommandNumber::new(96))
/// .with_sequence(Sequence::new(7))
/// .with_context("count", "32");
///
/// assert_eq!(violation.sequence, Some(Sequence::new(7)));
/// assert!(violation.to_string().contains("seq=7"));
/// ```
#[derive(Debug, Clone, serde::Serialize)]
pub struct UplinkViolation {
    /// The severity level of this violation.
    pub severity: ViolationSeverity,
    /// The pipeline stage where the violation occurred.
    pub kind: ViolationKind,
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Source location where the violation was detected (file:line).
    pub location: &'static str,
    /// The latest command number at the time of the violation, if applicable.
    pub command: Option<CommandNumber>,
    /// The outgoing sequence involved, if applicable.
    pub sequence: Option<Sequence>,
    /// Additional structured context as key-value pairs.
    pub context: BTreeMap<String, String>,
}

impl UplinkViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        severity: ViolationSeverity,
        kind: ViolationKind,
        message: impl Into<String>,
        location: &'static str,
    ) -> Self {
        Self {
            severity,
            kind,
            message: message.into(),
            location,
            command: None,
            sequence: None,
            context: BTreeMap::new(),
        }
    }

    /// Sets the command number at which this violation occurred.
    #[must_use]
    pub fn with_command(mut self, command: CommandNumber) -> Self {
        self.command = Some(command);
        self
    }

    /// Sets the outgoing sequence involved in this violation.
    #[must_use]
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Adds a context key-value pair.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Serializes this violation to a JSON string.
    ///
    /// Returns `None` if serialization fails (which should not happen for
    /// well-formed violations).
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }

    /// Serializes this violation to a pretty-printed JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json_pretty(&self) -> Option<String> {
        serde_json::to_string_pretty(self).ok()
    }
}

impl std::fmt::Display for UplinkViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}/{}] {} (at {}",
            self.severity, self.kind, self.message, self.location
        )?;
        if let Some(command) = self.command {
            write!(f, ", cmd={command}")?;
        }
        if let Some(sequence) = self.sequence {
            write!(f, ", seq={sequence}")?;
        }
        if !self.context.is_empty() {
            write!(f, ", context={:?}", self.context)?;
        }
        write!(f, ")")
    }
}

/// Trait for observing uplink violations.
///
/// Implement this trait to create custom observers that can react to
/// violations in various ways (logging, metrics, alerting, etc.).
///
/// # Thread Safety
///
/// When the `sync-send` feature is enabled, observers must be `Send + Sync`
/// to allow sharing across threads.
///
/// # Example
///
/// ```
/// use cmd_uplink::telemetry::{ViolationObserver, UplinkViolation};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountingObserver {
///     seen: AtomicUsize,
/// }
///
/// impl ViolationObserver for CountingObserver {
///     fn on_violation(&self, _violation: &UplinkViolation) {
///         self.seen.fetch_add(1, Ordering::Relaxed);
///     }
/// }
/// ```
#[cfg(feature = "sync-send")]
pub trait ViolationObserver: Send + Sync {
    /// Called when a violation is detected.
    ///
    /// This method should be relatively quick to execute, as it may be
    /// called from inside the per-tick transmit path.
    fn on_violation(&self, violation: &UplinkViolation);
}

#[cfg(not(feature = "sync-send"))]
/// Trait for observing uplink violations.
///
/// Implement this trait to create custom observers that can react to
/// violations in various ways (logging, metrics, alerting, etc.).
pub trait ViolationObserver {
    /// Called when a violation is detected.
    fn on_violation(&self, violation: &UplinkViolation);
}

/// Built-in observer that logs violations via the `tracing` crate.
///
/// # Log Levels
///
/// - `Warning` severity → `tracing::warn!`
/// - `Error` severity → `tracing::error!`
/// - `Critical` severity → `tracing::error!` with `severity = "critical"`
///
/// All fields are emitted as structured tracing fields (`severity`, `kind`, `location`,
/// `command`, `sequence`, `context`), which keeps the output usable with JSON formatters.
#[derive(Debug, Default, Clone)]
pub struct TracingObserver;

impl TracingObserver {
    /// Creates a new tracing observer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn format_optional<T: std::fmt::Display>(value: Option<T>) -> String {
        match value {
            Some(v) => v.to_string(),
            None => "null".to_owned(),
        }
    }
}

impl ViolationObserver for TracingObserver {
    fn on_violation(&self, violation: &UplinkViolation) {
        let severity = violation.severity.as_str();
        let kind = violation.kind.as_str();
        let location = violation.location;
        let command = Self::format_optional(violation.command);
        let sequence = Self::format_optional(violation.sequence);

        // compact key=value form for sinks without dynamic field expansion
        let context_str = if violation.context.is_empty() {
            "{}".to_owned()
        } else {
            let pairs: Vec<String> = violation
                .context
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            format!("{{{}}}", pairs.join(", "))
        };

        match violation.severity {
            ViolationSeverity::Warning => {
                tracing::warn!(
                    severity,
                    kind,
                    location,
                    command = %command,
                    sequence = %sequence,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
            ViolationSeverity::Error => {
                tracing::error!(
                    severity,
                    kind,
                    location,
                    command = %command,
                    sequence = %sequence,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
            ViolationSeverity::Critical => {
                tracing::error!(
                    severity = "critical",
                    kind,
                    location,
                    command = %command,
                    sequence = %sequence,
                    context = %context_str,
                    "{}",
                    violation.message
                );
            },
        }
    }
}

/// Built-in observer that collects violations for testing.
///
/// # Example
///
/// ```
/// use cmd_uplink::telemetry::{
///     CollectingObserver, UplinkViolation, ViolationKind, ViolationObserver, ViolationSeverity,
/// };
///
/// let observer = CollectingObserver::new();
///
/// observer.on_violation(&UplinkViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::InputTracking,
///     "three sources down",
///     "test.rs:1",
/// ));
///
/// assert_eq!(observer.len(), 1);
/// assert!(observer.has_violation(ViolationKind::InputTracking));
/// ```
#[derive(Debug, Default)]
pub struct CollectingObserver {
    violations: Mutex<Vec<UplinkViolation>>,
}

impl CollectingObserver {
    /// Creates a new collecting observer with an empty violation list.
    #[must_use]
    pub fn new() -> Self {
        Self {
            violations: Mutex::new(Vec::new()),
        }
    }

    /// Returns a copy of all collected violations.
    #[must_use]
    pub fn violations(&self) -> Vec<UplinkViolation> {
        self.violations.lock().clone()
    }

    /// Returns the number of collected violations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.violations.lock().len()
    }

    /// Returns true if no violations have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.violations.lock().is_empty()
    }

    /// Checks if any violation of the specified kind has been collected.
    #[must_use]
    pub fn has_violation(&self, kind: ViolationKind) -> bool {
        self.violations.lock().iter().any(|v| v.kind == kind)
    }

    /// Checks if any violation with the specified severity has been collected.
    #[must_use]
    pub fn has_severity(&self, severity: ViolationSeverity) -> bool {
        self.violations
            .lock()
            .iter()
            .any(|v| v.severity == severity)
    }

    /// Returns all violations matching the specified kind.
    #[must_use]
    pub fn violations_of_kind(&self, kind: ViolationKind) -> Vec<UplinkViolation> {
        self.violations
            .lock()
            .iter()
            .filter(|v| v.kind == kind)
            .cloned()
            .collect()
    }

    /// Clears all collected violations.
    pub fn clear(&self) {
        self.violations.lock().clear();
    }
}

impl ViolationObserver for CollectingObserver {
    fn on_violation(&self, violation: &UplinkViolation) {
        self.violations.lock().push(violation.clone());
    }
}

/// A composite observer that forwards violations to multiple observers.
///
/// Useful when you want to both log violations and collect them for testing.
#[derive(Default)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ViolationObserver>>,
}

impl CompositeObserver {
    /// Creates a new composite observer with no child observers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    /// Adds an observer to the composite.
    pub fn add(&mut self, observer: Arc<dyn ViolationObserver>) {
        self.observers.push(observer);
    }

    /// Creates a composite observer from a list of observers.
    #[must_use]
    pub fn from_observers(observers: Vec<Arc<dyn ViolationObserver>>) -> Self {
        Self { observers }
    }
}

impl ViolationObserver for CompositeObserver {
    fn on_violation(&self, violation: &UplinkViolation) {
        for observer in &self.observers {
            observer.on_violation(violation);
        }
    }
}

impl std::fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("num_observers", &self.observers.len())
            .finish()
    }
}

/// Macro for reporting violations with location tracking.
///
/// Creates an [`UplinkViolation`] with the current file and line and logs it
/// through [`TracingObserver`]. Components that have no session observer at hand
/// (the PRNG, invariant checks) use this form.
///
/// # Syntax
///
/// ```text
/// report_violation!(severity, kind, "message");
/// report_violation!(severity, kind, "message with {}", format_args);
/// ```
///
/// # Example
///
/// ```
/// use cmd_uplink::{report_violation, telemetry::{ViolationSeverity, ViolationKind}};
///
/// report_violation!(ViolationSeverity::Warning, ViolationKind::Configuration,
///     "redundancy window {} clamped to {}", 9, 3);
/// ```
#[macro_export]
macro_rules! report_violation {
    ($severity:expr, $kind:expr, $msg:literal) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::UplinkViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};

    ($severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        use $crate::telemetry::ViolationObserver as _;
        let violation = $crate::telemetry::UplinkViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::TracingObserver.on_violation(&violation);
    }};
}

/// Asserts that no violations have been collected.
///
/// # Panics
///
/// Panics if the observer contains any violations, printing them for debugging.
///
/// # Example
///
/// ```
/// use cmd_uplink::{assert_no_violations, telemetry::CollectingObserver};
///
/// let observer = CollectingObserver::new();
/// assert_no_violations!(observer);
/// ```
#[macro_export]
macro_rules! assert_no_violations {
    ($observer:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "Expected no violations, but found {}:\n{:#?}",
            violations.len(),
            violations
        );
    }};

    ($observer:expr, $msg:expr) => {{
        let violations = $observer.violations();
        assert!(
            violations.is_empty(),
            "{}\nExpected no violations, but found {}:\n{:#?}",
            $msg,
            violations.len(),
            violations
        );
    }};
}

/// Asserts that a violation of the specified kind was collected.
///
/// # Panics
///
/// Panics if no violation of the specified kind was found.
///
/// # Example
///
/// ```
/// use cmd_uplink::{assert_violation, telemetry::{CollectingObserver, ViolationKind, ViolationObserver, UplinkViolation, ViolationSeverity}};
///
/// let observer = CollectingObserver::new();
/// observer.on_violation(&UplinkViolation::new(
///     ViolationSeverity::Error,
///     ViolationKind::Encoding,
///     "test",
///     "test.rs:1",
/// ));
/// assert_violation!(observer, ViolationKind::Encoding);
/// ```
#[macro_export]
macro_rules! assert_violation {
    ($observer:expr, $kind:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "Expected violation of kind {:?}, but found: {:#?}",
            $kind,
            $observer.violations()
        );
    }};

    ($observer:expr, $kind:expr, $msg:expr) => {{
        assert!(
            $observer.has_violation($kind),
            "{}\nExpected violation of kind {:?}, but found: {:#?}",
            $msg,
            $kind,
            $observer.violations()
        );
    }};
}

/// Reports a violation to an optional observer, falling back to [`TracingObserver`] if `None`.
///
/// # Example
///
/// ```
/// use cmd_uplink::telemetry::{
///     report_to_observer, CollectingObserver, UplinkViolation, ViolationKind, ViolationSeverity
/// };
/// use std::sync::Arc;
///
/// let observer = Arc::new(CollectingObserver::new());
/// let violation = UplinkViolation::new(
///     ViolationSeverity::Warning,
///     ViolationKind::InputTracking,
///     "test message",
///     "test.rs:1",
/// );
///
/// report_to_observer(Some(&observer), &violation);
/// assert_eq!(observer.len(), 1);
///
/// // no observer: logged through tracing
/// report_to_observer(None::<&Arc<CollectingObserver>>, &violation);
/// ```
pub fn report_to_observer<O: ViolationObserver + ?Sized>(
    observer: Option<&Arc<O>>,
    violation: &UplinkViolation,
) {
    match observer {
        Some(obs) => obs.on_violation(violation),
        None => TracingObserver.on_violation(violation),
    }
}

/// Macro for reporting violations through a session's observer.
///
/// Like [`report_violation!`], but takes an `Option<Arc<dyn ViolationObserver>>`
/// and falls back to [`TracingObserver`] when it is `None`.
///
/// # Syntax
///
/// ```text
/// report_violation_to!(observer, severity, kind, "message");
/// report_violation_to!(observer, severity, kind, "message with {}", format_args);
/// ```
///
/// # Example
///
/// ```
/// use cmd_uplink::{report_violation_to, telemetry::{ViolationSeverity, ViolationKind, CollectingObserver, ViolationObserver}};
/// use std::sync::Arc;
///
/// let observer: Option<Arc<dyn ViolationObserver>> = Some(Arc::new(CollectingObserver::new()));
///
/// report_violation_to!(&observer, ViolationSeverity::Warning, ViolationKind::InputTracking,
///     "source {} rejected", 9);
/// ```
#[macro_export]
macro_rules! report_violation_to {
    ($observer:expr, $severity:expr, $kind:expr, $msg:literal) => {{
        let violation = $crate::telemetry::UplinkViolation::new(
            $severity,
            $kind,
            $msg,
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};

    ($observer:expr, $severity:expr, $kind:expr, $fmt:literal, $($arg:tt)+) => {{
        let violation = $crate::telemetry::UplinkViolation::new(
            $severity,
            $kind,
            format!($fmt, $($arg)+),
            concat!(file!(), ":", line!()),
        );
        $crate::telemetry::report_to_observer($observer.as_ref(), &violation);
    }};
}

// ==========================================
// Runtime Invariant Checking
// ==========================================

/// Result of an invariant check.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InvariantViolation {
    /// Name of the type whose invariant was violated.
    pub type_name: &'static str,
    /// Description of the violated invariant.
    pub invariant: String,
    /// Additional diagnostic context.
    pub details: Option<String>,
}

impl InvariantViolation {
    /// Creates a new invariant violation.
    #[must_use]
    pub fn new(type_name: &'static str, invariant: impl Into<String>) -> Self {
        Self {
            type_name,
            invariant: invariant.into(),
            details: None,
        }
    }

    /// Adds additional details to the violation.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Serializes this violation to a JSON string.
    #[cfg(feature = "json")]
    #[must_use]
    pub fn to_json(&self) -> Option<String> {
        serde_json::to_string(self).ok()
    }
}

impl std::fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.type_name, self.invariant)?;
        if let Some(details) = &self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

/// Trait for types that maintain internal invariants.
///
/// Types implementing this trait can have their invariants checked at runtime
/// during debug builds or when the `paranoid` feature is enabled.
pub trait InvariantChecker {
    /// Checks that all invariants of this type are satisfied.
    ///
    /// Returns `Ok(())` if all invariants hold, or an `InvariantViolation`
    /// describing the first broken invariant.
    fn check_invariants(&self) -> Result<(), InvariantViolation>;
}

/// Macro for conditionally checking invariants in debug builds.
///
/// Expands to an invariant check in debug builds but compiles to nothing in
/// release builds, unless the `paranoid` feature is enabled.
#[macro_export]
#[cfg(any(debug_assertions, feature = "paranoid"))]
macro_rules! debug_check_invariants {
    ($expr:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{}",
                violation
            );
        }
    }};

    ($expr:expr, $context:expr) => {{
        use $crate::telemetry::InvariantChecker as _;
        if let Err(violation) = $expr.check_invariants() {
            $crate::report_violation!(
                $crate::telemetry::ViolationSeverity::Critical,
                $crate::telemetry::ViolationKind::Invariant,
                "{} [context: {}]",
                violation,
                $context
            );
        }
    }};
}

/// No-op version for release builds without `paranoid` feature.
#[macro_export]
#[cfg(not(any(debug_assertions, feature = "paranoid")))]
macro_rules! debug_check_invariants {
    ($expr:expr) => {{}};
    ($expr:expr, $context:expr) => {{}};
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn sample(kind: ViolationKind, severity: ViolationSeverity) -> UplinkViolation {
        UplinkViolation::new(severity, kind, "sample", "test.rs:1")
    }

    #[test]
    fn test_violation_severity_ordering() {
        assert!(ViolationSeverity::Warning < ViolationSeverity::Error);
        assert!(ViolationSeverity::Error < ViolationSeverity::Critical);
    }

    #[test]
    fn test_violation_kind_as_str() {
        assert_eq!(ViolationKind::InputTracking.as_str(), "input_tracking");
        assert_eq!(ViolationKind::CommandAssembly.as_str(), "command_assembly");
        assert_eq!(ViolationKind::CommandHistory.as_str(), "command_history");
        assert_eq!(ViolationKind::Encoding.as_str(), "encoding");
        assert_eq!(ViolationKind::Transmission.as_str(), "transmission");
        assert_eq!(ViolationKind::Configuration.as_str(), "configuration");
        assert_eq!(ViolationKind::InternalError.as_str(), "internal_error");
        assert_eq!(ViolationKind::Invariant.as_str(), "invariant");
    }

    #[test]
    fn test_violation_builder() {
        let violation = UplinkViolation::new(
            ViolationSeverity::Error,
            ViolationKind::Encoding,
            "overflow",
            "test.rs:42",
        )
        .with_command(CommandNumber::new(100))
        .with_sequence(Sequence::new(9))
        .with_context("count", "32");

        assert_eq!(violation.command, Some(CommandNumber::new(100)));
        assert_eq!(violation.sequence, Some(Sequence::new(9)));
        assert_eq!(violation.context.get("count"), Some(&"32".to_owned()));
    }

    #[test]
    fn test_violation_display() {
        let violation = sample(ViolationKind::InputTracking, ViolationSeverity::Warning)
            .with_command(CommandNumber::new(3));
        let display = violation.to_string();
        assert!(display.contains("warning"));
        assert!(display.contains("input_tracking"));
        assert!(display.contains("cmd=3"));
        assert!(!display.contains("seq="));
    }

    #[test]
    fn test_collecting_observer_filters() {
        let observer = CollectingObserver::new();
        assert!(observer.is_empty());

        observer.on_violation(&sample(
            ViolationKind::InputTracking,
            ViolationSeverity::Warning,
        ));
        observer.on_violation(&sample(ViolationKind::Encoding, ViolationSeverity::Error));

        assert_eq!(observer.len(), 2);
        assert!(observer.has_violation(ViolationKind::Encoding));
        assert!(!observer.has_violation(ViolationKind::Invariant));
        assert!(observer.has_severity(ViolationSeverity::Warning));
        assert_eq!(
            observer
                .violations_of_kind(ViolationKind::InputTracking)
                .len(),
            1
        );

        observer.clear();
        assert!(observer.is_empty());
    }

    #[test]
    fn test_composite_observer_forwards_to_all() {
        let a = Arc::new(CollectingObserver::new());
        let b = Arc::new(CollectingObserver::new());
        let mut composite = CompositeObserver::new();
        composite.add(a.clone());
        composite.add(b.clone());

        composite.on_violation(&sample(
            ViolationKind::Transmission,
            ViolationSeverity::Critical,
        ));

        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 1);
        assert!(format!("{composite:?}").contains("num_observers: 2"));
    }

    #[test]
    fn test_report_violation_to_uses_observer() {
        let collector = Arc::new(CollectingObserver::new());
        let observer: Option<Arc<dyn ViolationObserver>> = Some(collector.clone());
        report_violation_to!(
            &observer,
            ViolationSeverity::Warning,
            ViolationKind::Configuration,
            "clamped {}",
            7
        );
        assert_eq!(collector.len(), 1);
        assert_eq!(collector.violations()[0].message, "clamped 7");

        let none: Option<Arc<dyn ViolationObserver>> = None;
        report_violation_to!(
            &none,
            ViolationSeverity::Warning,
            ViolationKind::Configuration,
            "logged only"
        );
    }

    #[test]
    fn test_invariant_violation_display() {
        let violation =
            InvariantViolation::new("CommandHistory", "slot mismatch").with_details("slot=3");
        assert_eq!(
            violation.to_string(),
            "CommandHistory: slot mismatch (slot=3)"
        );
    }

    #[cfg(feature = "json")]
    #[test]
    fn test_violation_json() {
        let json = sample(ViolationKind::Encoding, ViolationSeverity::Error)
            .with_sequence(Sequence::new(5))
            .to_json()
            .unwrap();
        assert!(json.contains(r#""severity":"error""#));
        assert!(json.contains(r#""kind":"encoding""#));
        assert!(json.contains(r#""sequence":5"#));
        assert!(json.contains(r#""command":null"#));
    }
}
