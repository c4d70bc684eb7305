//! Build-trigger comment language
//!
//! A trigger comment looks like this (whitespace between tokens is ignored):
//!
//! ````text
//! :rocket:[build-name-a][optional-build-name-b]
//! :rocket:[build-name-c]
//! ```ini
//! OPTIONAL_ENV_VAR=xyz
//! ANOTHER_ONE="quoted \"value\""
//! ```
//! ````
//!
//! Each rocket marker (`:rocket:` or the emoji) may be quoted with `>` or
//! wrapped in inline-code backticks. The trailing env fence is optional and
//! may be left unclosed.

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Prefix applied to user-supplied variables before they reach the CI.
pub const USER_ENV_PREFIX: &str = "GH_CONTROL_USER_ENV_";

const PREAMBLE_PATTERN: &str = r"\s*>?\s*`?\s*(?:🚀|:rocket:)";
const PIPELINE_NAMES_PATTERN: &str = r"(?:\s*\[\s*[A-Za-z0-9_-]+\s*\])+\s*`?";
const ENV_SECTION_PATTERN: &str = r"(?:```(?:ini)?\s*(?P<env>(?s:.+?))\s*(?:```)?\s*)?";

static PREAMBLE_RE: LazyLock<Regex> =
    LazyLock::new(|| compile(&format!("^{PREAMBLE_PATTERN}")));

static ROCKET_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        "{PREAMBLE_PATTERN}(?P<names>{PIPELINE_NAMES_PATTERN})"
    ))
});

static ROCKET_SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^(?:{PREAMBLE_PATTERN}{PIPELINE_NAMES_PATTERN}\s*)+"
    ))
});

static TRIGGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile(&format!(
        r"^(?:{PREAMBLE_PATTERN}{PIPELINE_NAMES_PATTERN}\s*)+\s*{ENV_SECTION_PATTERN}$"
    ))
});

static PIPELINE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| compile(r"[A-Za-z0-9_-]+"));

// The patterns are constants; a failure here is a programming error caught by the tests.
fn compile(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(e) => panic!("invalid trigger pattern {pattern:?}: {e}"),
    }
}

/// Decoded form of a trigger comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TriggerCommand {
    /// Pipeline slugs in the order they appear in the comment.
    pub build_names: Vec<String>,
    /// User-supplied variables, keys exactly as written.
    pub env: BTreeMap<String, String>,
}

impl TriggerCommand {
    /// User variables re-keyed under [`USER_ENV_PREFIX`].
    pub fn namespaced_env(&self) -> BTreeMap<String, String> {
        self.env
            .iter()
            .map(|(key, value)| (format!("{USER_ENV_PREFIX}{key}"), value.clone()))
            .collect()
    }

    pub fn has_env(&self) -> bool {
        !self.env.is_empty()
    }
}

/// True when the whole comment body is a valid trigger command.
pub fn is_trigger_comment(comment_body: &str) -> bool {
    TRIGGER_RE.is_match(comment_body)
}

/// True when the comment starts with a rocket marker, whatever follows it.
pub fn has_preamble(comment_body: &str) -> bool {
    PREAMBLE_RE.is_match(comment_body)
}

/// Parses a trigger comment.
///
/// Callers decide with [`is_trigger_comment`] whether the comment is a command;
/// a body that does not match yields an empty command instead of an error.
pub fn parse_trigger_comment(comment_body: &str) -> TriggerCommand {
    let Some(captures) = TRIGGER_RE.captures(comment_body) else {
        return TriggerCommand::default();
    };

    let rocket_section = ROCKET_SECTION_RE
        .find(comment_body)
        .map(|section| section.as_str())
        .unwrap_or_default();

    let build_names = ROCKET_RE
        .captures_iter(rocket_section)
        .filter_map(|rocket| rocket.name("names"))
        .flat_map(|names| PIPELINE_NAME_RE.find_iter(names.as_str()))
        .map(|name| name.as_str().to_string())
        .collect();

    let env = captures
        .name("env")
        .map(|block| parse_env_block(block.as_str()))
        .unwrap_or_default();

    TriggerCommand { build_names, env }
}

fn is_env_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Turns `KEY=value` lines into a map; lines with invalid keys are skipped.
fn parse_env_block(block: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    for line in block.lines() {
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line.trim(), ""),
        };
        if !is_env_key(key) {
            continue;
        }
        let value = if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            match serde_json::from_str::<String>(value) {
                Ok(decoded) => decoded,
                Err(_) => continue,
            }
        } else {
            value.to_string()
        };
        env.insert(key.to_string(), value);
    }
    env
}

#[cfg(test)]
mod tests {
    use super::{has_preamble, is_trigger_comment, parse_trigger_comment, TriggerCommand};
    use std::collections::BTreeMap;

    fn names(comment: &str) -> Vec<String> {
        parse_trigger_comment(comment).build_names
    }

    fn env_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn unit_matches_simple_and_emoji_markers() {
        assert!(is_trigger_comment(":rocket:[x-build]"));
        assert!(is_trigger_comment("🚀[x-build]"));
        assert!(is_trigger_comment("    :rocket:      [    x-build    ]     "));
    }

    #[test]
    fn unit_matches_quoted_and_multi_pipeline_comments() {
        assert!(is_trigger_comment("> :rocket:[x-build]\n\n"));
        assert!(is_trigger_comment("      > :rocket:[x-build]\n\n"));
        assert!(is_trigger_comment("> :rocket:[x-build][y-build]\n\n"));
        assert!(is_trigger_comment("> :rocket:[x-build]    [y-build]\n\n"));
        assert!(is_trigger_comment(
            ":rocket:[x-build]\n    :rocket:[y-build]\n\n"
        ));
        assert!(is_trigger_comment(
            "> :rocket:[x-build][z-build]\n\n    > :rocket:[y-build]\n\n"
        ));
    }

    #[test]
    fn unit_matches_comments_with_env_blocks() {
        let with_env = "
          :rocket:[x-build]
          ```ini
          A=a
          B=b
          C=

          D
          E=e
          =f
          some-forbidden.chars=x
          ```
";
        assert!(is_trigger_comment(with_env));

        let empty_env = "
          :rocket:[x-build]
          ```ini
          ```
";
        assert!(is_trigger_comment(empty_env));

        let plain_fence = "
          :rocket:[x-build]
          ```
          A=a
          ```
";
        assert!(is_trigger_comment(plain_fence));
    }

    #[test]
    fn unit_rejects_partial_matches_and_unrelated_comments() {
        assert!(!is_trigger_comment(":rocket:[x-build] please"));
        assert!(!is_trigger_comment("please :rocket:[x-build]"));
        assert!(!is_trigger_comment(":rocket: x-build"));
        assert!(!is_trigger_comment(":rocket:[x.build]"));
        assert!(!is_trigger_comment("LGTM 🚀"));
        assert!(!is_trigger_comment(""));
    }

    #[test]
    fn unit_preamble_detects_near_miss_commands() {
        assert!(has_preamble(":rocket: x-build"));
        assert!(has_preamble("  > `🚀 oops"));
        assert!(has_preamble(":rocket:[x-build] please"));
        assert!(!has_preamble("LGTM 🚀"));
        assert!(!has_preamble("ship it"));
    }

    #[test]
    fn functional_parses_simple_comment() {
        assert_eq!(
            parse_trigger_comment(":rocket:[x-build]"),
            TriggerCommand {
                build_names: vec!["x-build".to_string()],
                env: BTreeMap::new(),
            }
        );
    }

    #[test]
    fn functional_parses_backtick_wrapped_and_whitespace_heavy_comments() {
        assert_eq!(names("> `:rocket:[x-build]`"), vec!["x-build"]);
        assert_eq!(names("🚀[x-build]"), vec!["x-build"]);
        assert_eq!(
            names("    :rocket:      [    x-build    ]     "),
            vec!["x-build"]
        );
        assert_eq!(
            names("    `  :rocket:      [    x-build    ]    `  "),
            vec!["x-build"]
        );
    }

    #[test]
    fn functional_parses_multiple_builds_in_source_order() {
        assert_eq!(
            names(":rocket:[x-build][y-build]"),
            vec!["x-build", "y-build"]
        );
        assert_eq!(
            names(":rocket:  [x-build]       [y-build]    "),
            vec!["x-build", "y-build"]
        );
        let separate_lines = "
          :rocket:[x-build][y-build]
          :rocket:[z-build]
";
        assert_eq!(
            names(separate_lines),
            vec!["x-build", "y-build", "z-build"]
        );
        let quoted = "
          > :rocket:[x-build][y-build]

          > :rocket:[z-build]
";
        assert_eq!(names(quoted), vec!["x-build", "y-build", "z-build"]);
        let quoted_backticks = "
              > `:rocket:[x-build][y-build]`

              > `:rocket:[z-build]`
";
        assert_eq!(
            names(quoted_backticks),
            vec!["x-build", "y-build", "z-build"]
        );
        assert_eq!(
            names(":rocket:[a] :rocket:[b][a]"),
            vec!["a", "b", "a"]
        );
    }

    #[test]
    fn functional_grammar_recovers_every_name_across_generated_layouts() {
        let markers = [":rocket:", "🚀"];
        let prefixes = ["", "> ", "  >  ", "`", "> `"];
        for marker in markers {
            for prefix in prefixes {
                let suffix = if prefix.contains('`') { "`" } else { "" };
                let mut comment = String::new();
                let mut expected = Vec::new();
                for line in 0..3 {
                    comment.push_str(&format!("{prefix}{marker} "));
                    for group in 0..2 {
                        let name = format!("build-{line}_{group}");
                        comment.push_str(&format!(" [ {name} ] "));
                        expected.push(name);
                    }
                    comment.push_str(suffix);
                    comment.push_str("\n\n");
                }
                assert!(is_trigger_comment(&comment), "{comment:?}");
                assert_eq!(names(&comment), expected, "{comment:?}");
            }
        }
    }

    #[test]
    fn functional_parses_env_block() {
        let markdown = "
          :rocket:[x-build]
          ```ini
          TRAILING_KEY_SPACES  =a
          LEADING_VALUE_SPACES=  b
          EMPTY_VALUE=


          NO_VALUE
          E=e
          =f
          some-forbidden.chars=x
          multiple=equal=signs
          KEEP_case=really do
          QUOTED_ENV=\"Some \\\"fancy\\\" var\"
          ```
";
        assert_eq!(
            parse_trigger_comment(markdown),
            TriggerCommand {
                build_names: vec!["x-build".to_string()],
                env: env_of(&[
                    ("TRAILING_KEY_SPACES", "a"),
                    ("LEADING_VALUE_SPACES", "b"),
                    ("EMPTY_VALUE", ""),
                    ("NO_VALUE", ""),
                    ("E", "e"),
                    ("multiple", "equal=signs"),
                    ("KEEP_case", "really do"),
                    ("QUOTED_ENV", "Some \"fancy\" var"),
                ]),
            }
        );
    }

    #[test]
    fn functional_parses_simple_env_pairs() {
        let markdown = ":rocket:[x-build]\n```\nA=a\nB=b\n```";
        assert_eq!(
            parse_trigger_comment(markdown).env,
            env_of(&[("A", "a"), ("B", "b")])
        );
    }

    #[test]
    fn functional_empty_and_plain_env_blocks() {
        let empty = "
          :rocket:[x-build]
          ```ini
          ```
";
        assert_eq!(
            parse_trigger_comment(empty),
            TriggerCommand {
                build_names: vec!["x-build".to_string()],
                env: BTreeMap::new(),
            }
        );

        let plain = "
          :rocket:[x-build]
          ```
          A=a
          ```
";
        assert_eq!(parse_trigger_comment(plain).env, env_of(&[("A", "a")]));
    }

    #[test]
    fn functional_accepts_unclosed_env_fence() {
        let markdown = "
          :rocket:[x-build]
          ```
          A=a
";
        assert!(is_trigger_comment(markdown));
        assert_eq!(
            parse_trigger_comment(markdown),
            TriggerCommand {
                build_names: vec!["x-build".to_string()],
                env: env_of(&[("A", "a")]),
            }
        );
    }

    #[test]
    fn regression_undecodable_quoted_value_drops_only_that_line() {
        let markdown = ":rocket:[x-build]\n```ini\nBAD=\"broken \\q\"\nGOOD=1\n```";
        assert_eq!(
            parse_trigger_comment(markdown).env,
            env_of(&[("GOOD", "1")])
        );
    }

    #[test]
    fn regression_rocket_inside_env_block_is_not_a_build() {
        let markdown = ":rocket:[x-build]\n```ini\nNOTE=:rocket:[y-build]\n```";
        let command = parse_trigger_comment(markdown);
        assert_eq!(command.build_names, vec!["x-build"]);
        assert_eq!(command.env, env_of(&[("NOTE", ":rocket:[y-build]")]));
    }

    #[test]
    fn unit_non_matching_comment_parses_to_empty_command() {
        assert_eq!(
            parse_trigger_comment("just a normal review comment"),
            TriggerCommand::default()
        );
        assert_eq!(
            parse_trigger_comment(":rocket:[x-build] trailing"),
            TriggerCommand::default()
        );
    }

    #[test]
    fn unit_namespaced_env_prefixes_every_key() {
        let command = TriggerCommand {
            build_names: vec!["x".to_string()],
            env: env_of(&[("A", "a"), ("b", "")]),
        };
        assert_eq!(
            command.namespaced_env(),
            env_of(&[("GH_CONTROL_USER_ENV_A", "a"), ("GH_CONTROL_USER_ENV_b", "")])
        );
        assert!(command.has_env());
    }
}
