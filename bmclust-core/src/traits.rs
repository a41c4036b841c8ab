//! Core trait definitions shared across bmclust crates.

/// A type that carries a numeric score (log-likelihood, AIC, etc.).
pub trait Scored {
    /// The score value.
    fn score(&self) -> f64;
}

/// A type that can produce a summary of its contents.
pub trait Summarizable {
    /// A one-line summary suitable for display.
    fn summary(&self) -> String;
}
