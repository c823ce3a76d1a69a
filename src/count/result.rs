use std::fmt;

/// Named measurement results in user-visible insertion order.
///
/// Holds `(name, value)` pairs for requested counters and metrics and
/// renders them as JSON, CSV, or a two-column table.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CounterResult {
    results: Vec<(String, f64)>,
}

impl CounterResult {
    pub fn new(results: Vec<(String, f64)>) -> Self {
        Self { results }
    }

    /// The value recorded under `name`, if any.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.results
            .iter()
            .find(|(result_name, _)| result_name == name)
            .map(|(_, value)| *value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.results.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Renders as a single JSON object, `{"name": value,…}`.
    pub fn to_json(&self) -> String {
        let mut json = String::from("{");
        for (index, (name, value)) in self.results.iter().enumerate() {
            if index > 0 {
                json.push(',');
            }
            json.push('"');
            json.push_str(name);
            json.push_str("\": ");
            json.push_str(&value.to_string());
        }
        json.push('}');
        json
    }

    /// Renders as CSV with the given column delimiter, optionally preceded
    /// by the header row `counter,value`.
    pub fn to_csv(&self, delimiter: char, print_header: bool) -> String {
        let mut csv = String::new();
        if print_header {
            csv.push_str("counter");
            csv.push(delimiter);
            csv.push_str("value\n");
        }
        for (index, (name, value)) in self.results.iter().enumerate() {
            if index > 0 {
                csv.push('\n');
            }
            csv.push_str(name);
            csv.push(delimiter);
            csv.push_str(&value.to_string());
        }
        csv
    }

    /// Renders as a two-column table with right-aligned values:
    ///
    /// ```text
    /// |      Value | Counter      |
    /// |------------|--------------|
    /// | 120990.000 | instructions |
    /// ```
    pub fn to_table(&self) -> String {
        let rows: Vec<(&str, String)> = self
            .results
            .iter()
            .map(|(name, value)| (name.as_str(), format!("{value:.3}")))
            .collect();

        // Column widths default to the header labels.
        let name_width = rows
            .iter()
            .map(|(name, _)| name.len())
            .chain([7])
            .max()
            .unwrap();
        let value_width = rows
            .iter()
            .map(|(_, value)| value.len())
            .chain([5])
            .max()
            .unwrap();

        let mut table = format!("| {:>value_width$} | {:<name_width$} |\n", "Value", "Counter");
        table.push_str(&format!(
            "|{}|{}|",
            "-".repeat(value_width + 2),
            "-".repeat(name_width + 2)
        ));
        for (name, value) in &rows {
            table.push_str(&format!("\n| {value:>value_width$} | {name:<name_width$} |"));
        }

        table
    }
}

impl fmt::Display for CounterResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_table())
    }
}

impl IntoIterator for CounterResult {
    type Item = (String, f64);
    type IntoIter = std::vec::IntoIter<(String, f64)>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}
