//! SQL seeding through the raw-SQL debug endpoint

use serde_json::Value;
use std::sync::Arc;

use restcheck_common::{Error, Result, TestLogger};

use crate::client::{Credential, RestBackend};
use crate::text::strip_code_fence;

/// Runs fixture seed blocks and single statements.
///
/// Statements run one by one with no surrounding transaction: a block that
/// fails halfway leaves its earlier statements applied.
#[derive(Clone)]
pub struct SqlSeeder {
    backend: Arc<dyn RestBackend>,
}

impl SqlSeeder {
    pub fn new(backend: Arc<dyn RestBackend>) -> Self {
        Self { backend }
    }

    /// Seed a fenced or bare SQL block as the service role.
    ///
    /// Returns the number of statements executed; stops at the first
    /// failing statement.
    pub async fn seed(&self, raw_sql: &str, logger: &mut TestLogger) -> Result<usize> {
        let statements = split_statements(&strip_code_fence(raw_sql));
        logger.info(format!("Seeding {} statement(s)", statements.len()));

        for (index, statement) in statements.iter().enumerate() {
            logger.debug(format!("seed[{}]: {}", index, statement));
            if let Err(message) = self
                .backend
                .execute_sql(&Credential::ServiceRole, statement)
                .await
            {
                logger.error(format!("Seed statement {} failed: {}", index, message));
                return Err(Error::Seed {
                    index,
                    statement: statement.clone(),
                    message,
                });
            }
        }

        Ok(statements.len())
    }

    /// Execute one statement with the given credential
    pub async fn execute_statement(
        &self,
        credential: &Credential,
        sql: &str,
    ) -> Result<Vec<Value>> {
        self.backend
            .execute_sql(credential, sql)
            .await
            .map_err(Error::Operation)
    }
}

/// Split a SQL block on `;`, dropping blank statements and re-appending the
/// terminator to each.
///
/// Semicolons inside quoted strings, quoted identifiers, dollar-quoted
/// bodies and comments do not split.
pub fn split_statements(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = find_closing(&chars, i + 1, c);
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = (i..chars.len())
                    .find(|&j| chars[j] == '\n')
                    .unwrap_or(chars.len());
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                let end = (i + 2..chars.len().saturating_sub(1))
                    .find(|&j| chars[j] == '*' && chars[j + 1] == '/')
                    .map(|j| j + 2)
                    .unwrap_or(chars.len());
                current.extend(&chars[i..end]);
                i = end;
                continue;
            }
            '$' => {
                if let Some(tag) = dollar_tag(&chars, i) {
                    let body_start = i + tag.len();
                    let end = find_tag(&chars, body_start, &tag)
                        .map(|j| j + tag.len())
                        .unwrap_or(chars.len());
                    current.extend(&chars[i..end]);
                    i = end;
                    continue;
                }
            }
            ';' => {
                push_statement(&mut statements, &current);
                current.clear();
                i += 1;
                continue;
            }
            _ => {}
        }
        current.push(c);
        i += 1;
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        statements.push(format!("{};", trimmed));
    }
}

/// Index just past the closing quote, honouring doubled quotes
fn find_closing(chars: &[char], mut i: usize, quote: char) -> usize {
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// `$$` or `$tag$` starting at `i`
fn dollar_tag(chars: &[char], i: usize) -> Option<String> {
    let mut j = i + 1;
    while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
        j += 1;
    }
    if j < chars.len() && chars[j] == '$' {
        // `$1` is a positional parameter, not a tag
        if j > i + 1 && chars[i + 1].is_ascii_digit() {
            return None;
        }
        Some(chars[i..=j].iter().collect())
    } else {
        None
    }
}

fn find_tag(chars: &[char], from: usize, tag: &str) -> Option<usize> {
    let tag: Vec<char> = tag.chars().collect();
    (from..chars.len()).find(|&j| chars[j..].starts_with(&tag))
}
