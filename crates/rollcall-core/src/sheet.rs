//! Cell helpers shared by roster and ledger workbooks.

use calamine::Data;

/// Render a cell the way it reads in a spreadsheet UI.
///
/// Whole floats lose their fractional part (`12.0` → `"12"`), since roll
/// numbers typed as numbers come back from xlsx as floats.
pub(crate) fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        other => other.to_string(),
    }
}

/// Finite numeric value of a text cell, if it has one.
pub(crate) fn numeric(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_text() {
        assert_eq!(cell_text(&Data::Empty), "");
        assert_eq!(cell_text(&Data::String("  Alice ".into())), "Alice");
        assert_eq!(cell_text(&Data::Int(7)), "7");
        assert_eq!(cell_text(&Data::Float(12.0)), "12");
        assert_eq!(cell_text(&Data::Float(1.5)), "1.5");
        assert_eq!(cell_text(&Data::Bool(true)), "true");
    }

    #[test]
    fn test_numeric() {
        assert_eq!(numeric("42"), Some(42.0));
        assert_eq!(numeric(" 3.5 "), Some(3.5));
        assert_eq!(numeric("CS-101"), None);
        assert_eq!(numeric("NaN"), None);
        assert_eq!(numeric(""), None);
    }
}
