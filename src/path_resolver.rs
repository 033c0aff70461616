//! Destination template rendering.

use crate::classifier::ExtractedFields;
use crate::pattern_store::Pattern;
use regex::{Captures, Regex};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{(\w+)\}").expect("placeholder regex is valid"));

/// Renders a pattern's destination template into a path.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathResolver;

impl PathResolver {
    /// Substitutes every `{field}` placeholder that has a value in `fields`.
    /// Placeholders without a field are kept as literal text. The template is
    /// scanned once, so braces inside a substituted value are left alone.
    pub fn render(&self, template: &str, fields: &ExtractedFields) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| match fields.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// The destination directory for a file: the rendered template joined
    /// under `base_directory`.
    pub fn resolve(&self, base_directory: &Path, pattern: &Pattern, fields: &ExtractedFields) -> PathBuf {
        let rendered = self.render(&pattern.destination_template, fields);
        rendered
            .split(['/', '\\'])
            .filter(|component| !component.is_empty())
            .fold(base_directory.to_path_buf(), |path, component| path.join(component))
    }

    /// The final path of `filename` once moved: `base/<rendered>/<filename>`.
    pub fn target_for(
        &self,
        base_directory: &Path,
        pattern: &Pattern,
        fields: &ExtractedFields,
        filename: &str,
    ) -> PathBuf {
        self.resolve(base_directory, pattern, fields).join(filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(number: &str, year: &str) -> ExtractedFields {
        [("number", number), ("year", year)].into_iter().collect()
    }

    #[test]
    fn test_render_nested_template() {
        let rendered = PathResolver.render("ACC/{year}/ACC{number}.{year}", &fields("134", "2023"));
        assert_eq!(rendered, "ACC/2023/ACC134.2023");
    }

    #[test]
    fn test_resolve_joins_under_base() {
        let pattern = Pattern::new("ACC", r"ACC(\d+)\.(\d+)", "ACC/{year}/ACC{number}.{year}", "d");
        let resolved = PathResolver.resolve(Path::new("/cases"), &pattern, &fields("134", "2023"));
        assert_eq!(resolved, Path::new("/cases/ACC/2023/ACC134.2023"));
    }

    #[test]
    fn test_unknown_placeholder_stays_literal() {
        let rendered = PathResolver.render("{client}/{year}/{number}", &fields("7", "2021"));
        assert_eq!(rendered, "{client}/2021/7");
    }

    #[test]
    fn test_extra_fields_are_substituted() {
        let mut f = fields("7", "2021");
        f.insert("client", "Smith");
        let rendered = PathResolver.render("{client}/{year}/{number}", &f);
        assert_eq!(rendered, "Smith/2021/7");
    }

    #[test]
    fn test_values_are_not_substituted_again() {
        let rendered = PathResolver.render("{number}/{year}", &fields("{year}", "2023"));
        assert_eq!(rendered, "{year}/2023");
    }

    #[test]
    fn test_values_from_classified_file_name_stay_literal() {
        let pattern = Pattern::new("ODD", r"(.+)_(\d\d)", "{number}/{year}", "d");
        let fields = match crate::classifier::Classifier
            .classify("{year}_23.pdf", &pattern)
            .unwrap()
        {
            crate::classifier::Classification::Matched(fields) => fields,
            crate::classifier::Classification::NoMatch => panic!("Expected a match"),
        };
        assert_eq!(fields.number(), Some("{year}"));
        assert_eq!(PathResolver.render(&pattern.destination_template, &fields), "{year}/2023");
    }

    #[test]
    fn test_target_for_appends_file_name() {
        let pattern = Pattern::new("ACC", r"ACC(\d+)\.(\d+)", "ACC{number}.{year}", "d");
        let target = PathResolver.target_for(
            Path::new("/cases"),
            &pattern,
            &fields("134", "2023"),
            "ACC134.23.pdf",
        );
        assert_eq!(target, Path::new("/cases/ACC134.2023/ACC134.23.pdf"));
    }

    #[test]
    fn test_leading_and_doubled_separators_are_ignored() {
        let pattern = Pattern::new("ACC", r"ACC(\d+)\.(\d+)", "/{year}//{number}/", "d");
        let resolved = PathResolver.resolve(Path::new("/cases"), &pattern, &fields("1", "2020"));
        assert_eq!(resolved, Path::new("/cases/2020/1"));
    }
}
