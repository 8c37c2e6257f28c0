//! Index-aligned aggregate of independent per-item failures.

use std::fmt;

const NO_ERRORS: &str = "No errors";

/// Outcome of N independent sub-operations, one slot per item.
///
/// `None` marks a slot that succeeded. The summary names the first failure and
/// the number of remaining ones, so a single log line is enough to tell whether
/// one item or most of a batch went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiError<E> {
    errors: Vec<Option<E>>,
}

impl<E> MultiError<E> {
    /// Create an aggregate with `len` empty slots.
    pub fn new(len: usize) -> Self {
        let mut errors = Vec::with_capacity(len);
        errors.resize_with(len, || None);
        Self { errors }
    }

    /// Record the failure for slot `index`, growing the aggregate if needed.
    pub fn set(&mut self, index: usize, error: E) {
        if index >= self.errors.len() {
            self.errors.resize_with(index + 1, || None);
        }
        self.errors[index] = Some(error);
    }

    pub fn push(&mut self, slot: Option<E>) {
        self.errors.push(slot);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_error(&self) -> bool {
        self.errors.iter().any(Option::is_some)
    }

    pub fn error_count(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    pub fn first(&self) -> Option<&E> {
        self.errors.iter().flatten().next()
    }

    pub fn get(&self, index: usize) -> Option<&E> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    /// Failed slots with their index.
    pub fn errors(&self) -> impl Iterator<Item = (usize, &E)> {
        self.errors
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_ref().map(|e| (i, e)))
    }

    pub fn into_inner(self) -> Vec<Option<E>> {
        self.errors
    }

    /// `Ok(())` when no slot failed, otherwise the aggregate itself.
    pub fn into_result(self) -> Result<(), Self> {
        if self.has_error() {
            Err(self)
        } else {
            Ok(())
        }
    }

    /// Convert every recorded error, keeping slot positions.
    pub fn map<F, U>(self, mut f: F) -> MultiError<U>
    where
        F: FnMut(E) -> U,
    {
        MultiError {
            errors: self.errors.into_iter().map(|e| e.map(&mut f)).collect(),
        }
    }
}

impl<E> Default for MultiError<E> {
    fn default() -> Self {
        Self { errors: Vec::new() }
    }
}

impl<E> FromIterator<Option<E>> for MultiError<E> {
    fn from_iter<I: IntoIterator<Item = Option<E>>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

impl<E: fmt::Display> fmt::Display for MultiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.error_count();
        match (self.first(), count) {
            (None, _) => f.write_str(NO_ERRORS),
            (Some(first), 1) => write!(f, "{}", first),
            (Some(first), n) => write!(f, "{} (and {} other errors)", first, n - 1),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for MultiError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.first().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    fn io_err(msg: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Other, msg.to_string())
    }

    #[test]
    fn test_empty_aggregate_reports_no_errors() {
        let errs: MultiError<io::Error> = MultiError::new(3);
        assert!(!errs.has_error());
        assert_eq!(errs.error_count(), 0);
        assert_eq!(errs.to_string(), "No errors");
        assert!(errs.into_result().is_ok());
    }

    #[test]
    fn test_single_error_uses_its_message() {
        let mut errs = MultiError::new(4);
        errs.set(2, io_err("disk gone"));
        assert_eq!(errs.to_string(), "disk gone");
        assert_eq!(errs.error_count(), 1);
        assert!(errs.get(2).is_some());
        assert!(errs.get(0).is_none());
    }

    #[test]
    fn test_multiple_errors_name_first_and_count_rest() {
        let errs: MultiError<io::Error> = vec![
            Some(io_err("even error")),
            None,
            Some(io_err("second")),
            None,
            Some(io_err("third")),
        ]
        .into_iter()
        .collect();
        assert_eq!(errs.to_string(), "even error (and 2 other errors)");
        let indices: Vec<usize> = errs.errors().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 2, 4]);
    }

    #[test]
    fn test_set_grows_aggregate() {
        let mut errs = MultiError::new(0);
        errs.set(3, io_err("late"));
        assert_eq!(errs.len(), 4);
        assert!(errs.has_error());
    }

    #[test]
    fn test_map_keeps_positions() {
        let mut errs = MultiError::new(2);
        errs.set(1, io_err("x"));
        let mapped = errs.map(|e| e.to_string());
        assert_eq!(mapped.get(1).map(String::as_str), Some("x"));
        assert!(mapped.get(0).is_none());
    }
}
