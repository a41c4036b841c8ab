//! Continuous character matrices.
//!
//! A [`TraitMatrix`] maps taxon names to per-site trait vectors. Every row
//! has the same number of sites, and every value is finite; missing data is
//! not supported.
//!
//! The text format is one taxon per line, the name followed by
//! whitespace-separated values:
//!
//! ```text
//! # taxon  site0  site1  site2
//! A        0.12   -1.4   3.0
//! B        0.40   -0.9   2.2
//! ```

use std::collections::BTreeMap;
use std::io::BufRead;

use bmclust_core::{BmclustError, Result, Summarizable};

/// Per-taxon continuous trait values.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TraitMatrix {
    rows: BTreeMap<String, Vec<f64>>,
    n_sites: usize,
}

impl TraitMatrix {
    /// An empty matrix.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a matrix from `(name, values)` rows.
    pub fn from_rows<I, S>(rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Vec<f64>)>,
        S: Into<String>,
    {
        let mut matrix = Self::new();
        for (name, values) in rows {
            matrix.insert(name, values)?;
        }
        Ok(matrix)
    }

    /// Add one taxon.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate name, an empty row, a non-finite value, or a row
    /// whose length differs from the rows already present.
    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<()> {
        let name = name.into();
        if values.is_empty() {
            return Err(BmclustError::InvalidInput(format!(
                "taxon '{}' has no trait values",
                name
            )));
        }
        if !self.rows.is_empty() && values.len() != self.n_sites {
            return Err(BmclustError::InvalidInput(format!(
                "taxon '{}' has {} sites, expected {}",
                name,
                values.len(),
                self.n_sites
            )));
        }
        if let Some(site) = values.iter().position(|v| !v.is_finite()) {
            return Err(BmclustError::InvalidInput(format!(
                "taxon '{}' has a non-finite value at site {}",
                name, site
            )));
        }
        if self.rows.contains_key(&name) {
            return Err(BmclustError::InvalidInput(format!(
                "duplicate taxon '{}'",
                name
            )));
        }
        self.n_sites = values.len();
        self.rows.insert(name, values);
        Ok(())
    }

    /// Parse the whitespace-delimited text format.
    pub fn parse(input: &str) -> Result<Self> {
        Self::from_reader(input.as_bytes())
    }

    /// Read the whitespace-delimited text format from any buffered reader.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut matrix = Self::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut fields = line.split_whitespace();
            let name = fields.next().unwrap_or_default().to_string();
            let values = fields
                .map(|f| {
                    f.parse::<f64>().map_err(|_| {
                        BmclustError::Parse(format!(
                            "line {}: invalid trait value '{}'",
                            lineno + 1,
                            f
                        ))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            matrix.insert(name, values)?;
        }
        Ok(matrix)
    }

    /// Values for one taxon.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.rows.get(name).map(|v| v.as_slice())
    }

    /// Number of sites (columns).
    pub fn n_sites(&self) -> usize {
        self.n_sites
    }

    /// Number of taxa (rows).
    pub fn n_taxa(&self) -> usize {
        self.rows.len()
    }

    /// Taxon names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(|k| k.as_str())
    }
}

impl Summarizable for TraitMatrix {
    fn summary(&self) -> String {
        format!(
            "TraitMatrix: {} taxa x {} sites",
            self.n_taxa(),
            self.n_sites()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_table() {
        let text = "# header\nA 1.0 2.0\n\nB\t-0.5\t3e-1\n";
        let m = TraitMatrix::parse(text).unwrap();
        assert_eq!(m.n_taxa(), 2);
        assert_eq!(m.n_sites(), 2);
        assert_eq!(m.get("B"), Some(&[-0.5, 0.3][..]));
        assert_eq!(m.summary(), "TraitMatrix: 2 taxa x 2 sites");
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = TraitMatrix::parse("A 1 2\nB 1\n").unwrap_err();
        assert!(matches!(err, BmclustError::InvalidInput(_)));
    }

    #[test]
    fn bad_value_rejected() {
        let err = TraitMatrix::parse("A 1 x\n").unwrap_err();
        assert!(matches!(err, BmclustError::Parse(_)));
    }

    #[test]
    fn nonfinite_and_duplicates_rejected() {
        let mut m = TraitMatrix::new();
        assert!(m.insert("A", vec![f64::NAN]).is_err());
        m.insert("A", vec![1.0]).unwrap();
        assert!(m.insert("A", vec![2.0]).is_err());
        assert!(m.insert("B", vec![]).is_err());
    }

    #[test]
    fn names_are_sorted() {
        let m = TraitMatrix::from_rows([("C", vec![1.0]), ("A", vec![2.0])]).unwrap();
        assert_eq!(m.names().collect::<Vec<_>>(), vec!["A", "C"]);
    }
}
