//! INI file configuration adapter.

use crate::domain::config_validation::parse_bool;
use crate::domain::error::RebalancerError;
use crate::ports::config_port::ConfigPort;
use configparser::ini::Ini;
use std::path::Path;

pub struct FileConfigAdapter {
    config: Ini,
}

impl FileConfigAdapter {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RebalancerError> {
        let path = path.as_ref();
        let mut config = Ini::new();
        config
            .load(path)
            .map_err(|reason| RebalancerError::ConfigParse {
                file: path.display().to_string(),
                reason,
            })?;
        Ok(Self { config })
    }

    pub fn from_string(content: &str) -> Result<Self, RebalancerError> {
        let mut config = Ini::new();
        config
            .read(content.to_string())
            .map_err(|reason| RebalancerError::ConfigParse {
                file: "<string>".into(),
                reason,
            })?;
        Ok(Self { config })
    }
}

impl ConfigPort for FileConfigAdapter {
    fn get_string(&self, section: &str, key: &str) -> Option<String> {
        self.config.get(section, key)
    }

    fn get_double(&self, section: &str, key: &str, default: f64) -> f64 {
        self.config
            .getfloat(section, key)
            .ok()
            .flatten()
            .unwrap_or(default)
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.config
            .get(section, key)
            .as_deref()
            .and_then(parse_bool)
            .unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();
        file
    }

    #[test]
    fn from_string_parses_sections() {
        let content = r#"
[portfolio]
securities = VFINX, VBMFX
max_loan = 0

[strategy]
thresholds = 18:0.5, 23:0.25, 30:0
"#;
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(
            adapter.get_string("portfolio", "securities"),
            Some("VFINX, VBMFX".to_string())
        );
        assert_eq!(
            adapter.get_string("strategy", "thresholds"),
            Some("18:0.5, 23:0.25, 30:0".to_string())
        );
    }

    #[test]
    fn comment_lines_are_skipped() {
        let content = "[data]\n; optional\nopens = opens\n# also a comment\n";
        let adapter = FileConfigAdapter::from_string(content).unwrap();
        assert_eq!(adapter.get_string("data", "opens"), Some("opens".to_string()));
    }

    #[test]
    fn get_string_returns_none_for_missing_key() {
        let adapter = FileConfigAdapter::from_string("[portfolio]\nmax_loan = 100\n").unwrap();
        assert_eq!(adapter.get_string("portfolio", "missing"), None);
        assert_eq!(adapter.get_string("missing_section", "key"), None);
    }

    #[test]
    fn get_double_returns_value_or_default() {
        let adapter = FileConfigAdapter::from_string(
            "[portfolio]\ninitial_capital = 1000000.5\nmax_loan = lots\n",
        )
        .unwrap();
        assert_eq!(
            adapter.get_double("portfolio", "initial_capital", 0.0),
            1000000.5
        );
        assert_eq!(adapter.get_double("portfolio", "max_loan", 99.9), 99.9);
        assert_eq!(adapter.get_double("portfolio", "missing", 1.5), 1.5);
    }

    #[test]
    fn get_bool_values() {
        let adapter = FileConfigAdapter::from_string(
            "[metrics]\na = true\nb = no\nc = 1\nd = perhaps\n",
        )
        .unwrap();
        assert!(adapter.get_bool("metrics", "a", false));
        assert!(!adapter.get_bool("metrics", "b", true));
        assert!(adapter.get_bool("metrics", "c", false));
        assert!(adapter.get_bool("metrics", "d", true));
        assert!(!adapter.get_bool("metrics", "missing", false));
    }

    #[test]
    fn from_file_reads_config() {
        let file = create_temp_config("[report]\noutput = /tmp/report.csv\n");
        let adapter = FileConfigAdapter::from_file(file.path()).unwrap();
        assert_eq!(
            adapter.get_string("report", "output"),
            Some("/tmp/report.csv".to_string())
        );
    }

    #[test]
    fn from_file_missing_file_is_a_parse_error() {
        let result = FileConfigAdapter::from_file("/nonexistent/path/config.ini");
        assert!(matches!(
            result,
            Err(RebalancerError::ConfigParse { file, .. }) if file == "/nonexistent/path/config.ini"
        ));
    }
}
