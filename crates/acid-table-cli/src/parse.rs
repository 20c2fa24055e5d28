//! Parsing of command-line inputs: schema specs, `--where` predicates,
//! `--set` assignments, `key=value` properties and JSON-lines rows.
//!
//! Predicate grammar (case-insensitive keywords):
//!
//! ```text
//! expr    := and (OR and)*
//! and     := unary (AND unary)*
//! unary   := NOT unary | '(' expr ')' | compare
//! compare := column op literal
//!          | column IS [NOT] NULL
//!          | column [NOT] IN '(' literal (',' literal)* ')'
//! op      := = | != | <> | < | <= | > | >=
//! ```
//!
//! Literals are typed by the column they are compared with, so `id = 7`
//! against a float column yields `7.0` and `state = CA` is the string `"CA"`.

use std::path::Path;

use acid_table_core::{
    Predicate, RowBatch, Value,
    transaction_log::{LogicalDataType, LogicalField, LogicalSchema},
};
use snafu::prelude::*;

use crate::error::{
    CliResult, InvalidAssignmentSnafu, InvalidJsonSnafu, InvalidLiteralSnafu,
    InvalidPredicateSnafu, InvalidRowSnafu, InvalidSchemaSnafu, InvalidSchemaSpecSnafu,
    ReadInputSnafu, RowsSnafu,
};

/// Parse `name:type[!],...`; a trailing `!` marks the column NOT NULL.
pub fn parse_schema(spec: &str) -> CliResult<LogicalSchema> {
    let mut fields = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (name, ty) = part.split_once(':').context(InvalidSchemaSpecSnafu {
            spec: spec.to_string(),
            msg: format!("expected name:type, got '{part}'"),
        })?;
        let (ty, nullable) = match ty.trim().strip_suffix('!') {
            Some(t) => (t, false),
            None => (ty.trim(), true),
        };
        let data_type = ty.parse::<LogicalDataType>().map_err(|msg| {
            InvalidSchemaSpecSnafu {
                spec: spec.to_string(),
                msg,
            }
            .build()
        })?;
        fields.push(LogicalField::new(name.trim(), data_type, nullable));
    }
    ensure!(
        !fields.is_empty(),
        InvalidSchemaSpecSnafu {
            spec: spec.to_string(),
            msg: "no columns".to_string(),
        }
    );
    LogicalSchema::new(fields).context(InvalidSchemaSnafu)
}

/// Split `key=value` at the first `=`.
pub fn parse_key_value(input: &str) -> CliResult<(String, String)> {
    let (key, value) = input.split_once('=').context(InvalidAssignmentSnafu {
        input: input.to_string(),
        msg: "expected key=value".to_string(),
    })?;
    let key = key.trim();
    ensure!(
        !key.is_empty(),
        InvalidAssignmentSnafu {
            input: input.to_string(),
            msg: "empty key".to_string(),
        }
    );
    Ok((key.to_string(), value.trim().to_string()))
}

/// Parse `column=literal`, typing the literal by the column.
pub fn parse_assignment(input: &str, schema: &LogicalSchema) -> CliResult<(String, Value)> {
    let (column, raw) = parse_key_value(input)?;
    let field = schema.field(&column).context(InvalidAssignmentSnafu {
        input: input.to_string(),
        msg: format!("unknown column {column}"),
    })?;
    let raw = unquote(&raw).unwrap_or(&raw);
    let value = typed_literal(raw, field)?;
    Ok((column, value))
}

fn unquote(raw: &str) -> Option<&str> {
    raw.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
}

fn typed_literal(raw: &str, field: &LogicalField) -> CliResult<Value> {
    if raw.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    let invalid = || {
        InvalidLiteralSnafu {
            literal: raw.to_string(),
            column: field.name.clone(),
            data_type: field.data_type,
        }
        .build()
    };
    match field.data_type {
        LogicalDataType::Utf8 => Ok(Value::Utf8(raw.to_string())),
        LogicalDataType::Int64 => raw.parse::<i64>().map(Value::Int64).map_err(|_| invalid()),
        LogicalDataType::Float64 => raw
            .parse::<f64>()
            .map(Value::Float64)
            .map_err(|_| invalid()),
        LogicalDataType::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Quoted(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            '\'' | '"' => {
                let quote = c;
                chars.next();
                let mut s = String::new();
                loop {
                    match chars.next() {
                        // A doubled quote is an escaped quote.
                        Some(ch) if ch == quote => {
                            if chars.peek() == Some(&quote) {
                                chars.next();
                                s.push(quote);
                            } else {
                                break;
                            }
                        }
                        Some(ch) => s.push(ch),
                        None => return Err("unterminated string literal".to_string()),
                    }
                }
                tokens.push(Token::Quoted(s));
            }
            '=' => {
                chars.next();
                tokens.push(Token::Op("="));
            }
            '!' => {
                chars.next();
                if chars.next() != Some('=') {
                    return Err("expected '=' after '!'".to_string());
                }
                tokens.push(Token::Op("!="));
            }
            '<' | '>' => {
                chars.next();
                let op = match (c, chars.peek()) {
                    ('<', Some('=')) => "<=",
                    ('<', Some('>')) => "<>",
                    ('>', Some('=')) => ">=",
                    ('<', _) => "<",
                    _ => ">",
                };
                if op.len() == 2 {
                    chars.next();
                }
                tokens.push(Token::Op(op));
            }
            _ => {
                let mut word = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_whitespace() || "()',=!<>\"".contains(ch) {
                        break;
                    }
                    word.push(ch);
                    chars.next();
                }
                tokens.push(Token::Word(word));
            }
        }
    }
    Ok(tokens)
}

struct PredicateParser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    schema: &'a LogicalSchema,
}

impl PredicateParser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword))
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), String> {
        if self.peek_keyword(keyword) {
            self.pos += 1;
            Ok(())
        } else {
            Err(format!("expected {keyword}"))
        }
    }

    fn expr(&mut self) -> Result<Predicate, String> {
        let mut left = self.and()?;
        while self.peek_keyword("or") {
            self.pos += 1;
            left = left.or(self.and()?);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Predicate, String> {
        let mut left = self.unary()?;
        while self.peek_keyword("and") {
            self.pos += 1;
            left = left.and(self.unary()?);
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Predicate, String> {
        if self.peek_keyword("not") {
            self.pos += 1;
            return Ok(self.unary()?.not());
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let inner = self.expr()?;
            if self.next() != Some(Token::RParen) {
                return Err("expected ')'".to_string());
            }
            return Ok(inner);
        }
        self.compare()
    }

    fn literal(&mut self, field: &LogicalField) -> Result<Value, String> {
        let raw = match self.next() {
            Some(Token::Word(w)) | Some(Token::Quoted(w)) => w,
            other => return Err(format!("expected a literal, found {other:?}")),
        };
        typed_literal(&raw, field).map_err(|e| e.to_string())
    }

    fn compare(&mut self) -> Result<Predicate, String> {
        let column = match self.next() {
            Some(Token::Word(w)) => w,
            other => return Err(format!("expected a column name, found {other:?}")),
        };
        let field = self
            .schema
            .field(&column)
            .ok_or_else(|| format!("unknown column {column}"))?
            .clone();

        if self.peek_keyword("is") {
            self.pos += 1;
            let negated = self.peek_keyword("not");
            if negated {
                self.pos += 1;
            }
            self.expect_keyword("null")?;
            return Ok(if negated {
                Predicate::is_not_null(column)
            } else {
                Predicate::is_null(column)
            });
        }

        let negated_in = self.peek_keyword("not");
        if negated_in {
            self.pos += 1;
        }
        if self.peek_keyword("in") {
            self.pos += 1;
            if self.next() != Some(Token::LParen) {
                return Err("expected '(' after IN".to_string());
            }
            let mut values = vec![self.literal(&field)?];
            loop {
                match self.next() {
                    Some(Token::Comma) => values.push(self.literal(&field)?),
                    Some(Token::RParen) => break,
                    other => return Err(format!("expected ',' or ')', found {other:?}")),
                }
            }
            let p = Predicate::in_list(column, values);
            return Ok(if negated_in { p.not() } else { p });
        }
        if negated_in {
            return Err("expected IN after NOT".to_string());
        }

        let op = match self.next() {
            Some(Token::Op(op)) => op,
            other => return Err(format!("expected an operator, found {other:?}")),
        };
        let value = self.literal(&field)?;
        Ok(match op {
            "=" => Predicate::eq(column, value),
            "!=" | "<>" => Predicate::not_eq(column, value),
            "<" => Predicate::lt(column, value),
            "<=" => Predicate::lt_eq(column, value),
            ">" => Predicate::gt(column, value),
            _ => Predicate::gt_eq(column, value),
        })
    }
}

/// Parse a `--where` expression against `schema`.
pub fn parse_predicate(input: &str, schema: &LogicalSchema) -> CliResult<Predicate> {
    let fail = |msg: String| {
        InvalidPredicateSnafu {
            input: input.to_string(),
            msg,
        }
        .build()
    };
    let tokens = tokenize(input).map_err(fail)?;
    if tokens.is_empty() {
        return Ok(Predicate::True);
    }
    let mut parser = PredicateParser {
        tokens,
        pos: 0,
        schema,
    };
    let predicate = parser.expr().map_err(fail)?;
    if let Some(extra) = parser.peek() {
        return Err(fail(format!("unexpected trailing input {extra:?}")));
    }
    Ok(predicate)
}

/// Read a JSON-lines file (or stdin for `-`).
pub fn read_input(path: &Path) -> CliResult<String> {
    if path == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context(ReadInputSnafu { path })
    } else {
        std::fs::read_to_string(path).context(ReadInputSnafu { path })
    }
}

fn infer_type(value: &serde_json::Value) -> Option<LogicalDataType> {
    match value {
        serde_json::Value::Bool(_) => Some(LogicalDataType::Bool),
        serde_json::Value::Number(n) if n.is_i64() => Some(LogicalDataType::Int64),
        serde_json::Value::Number(_) => Some(LogicalDataType::Float64),
        serde_json::Value::String(_) => Some(LogicalDataType::Utf8),
        _ => None,
    }
}

/// Widen `current` to also hold `next`: integers widen to floats, any other
/// disagreement keeps the first type and surfaces as a row error later.
fn widen(current: LogicalDataType, next: LogicalDataType) -> LogicalDataType {
    match (current, next) {
        (LogicalDataType::Int64, LogicalDataType::Float64) => LogicalDataType::Float64,
        _ => current,
    }
}

/// Convert JSON-lines text into rows.
///
/// The batch carries the table columns that appear on at least one line, in
/// table order, so a column missing from the whole input reaches the table's
/// schema check. Keys the table does not know become extra nullable columns
/// whose type is inferred from their non-null values (integers widen to
/// floats); the table decides whether to accept them (schema evolution) or
/// reject the write.
pub fn rows_from_jsonl(text: &str, table_schema: &LogicalSchema) -> CliResult<RowBatch> {
    let mut objects = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value =
            serde_json::from_str(line).context(InvalidJsonSnafu { line: line_no })?;
        match value {
            serde_json::Value::Object(map) => objects.push((line_no, map)),
            _ => {
                return InvalidRowSnafu {
                    line: line_no,
                    msg: "expected a JSON object".to_string(),
                }
                .fail();
            }
        }
    }

    if objects.is_empty() {
        return Ok(RowBatch::empty(table_schema.clone()));
    }

    let mut fields: Vec<LogicalField> = table_schema
        .columns()
        .iter()
        .filter(|f| objects.iter().any(|(_, map)| map.contains_key(&f.name)))
        .cloned()
        .collect();
    let mut extras: Vec<LogicalField> = Vec::new();
    for (_, map) in &objects {
        for (key, value) in map {
            if table_schema.field(key).is_some() {
                continue;
            }
            let Some(dt) = infer_type(value) else {
                continue;
            };
            match extras.iter_mut().find(|f| &f.name == key) {
                Some(field) => field.data_type = widen(field.data_type, dt),
                None => extras.push(LogicalField::new(key.clone(), dt, true)),
            }
        }
    }
    fields.extend(extras);

    // Keys that are null on every line still need a column.
    for (line, map) in &objects {
        if let Some(key) = map.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
            return InvalidRowSnafu {
                line: *line,
                msg: format!("cannot infer a type for column {key}"),
            }
            .fail();
        }
    }
    let schema = LogicalSchema::new(fields).context(InvalidSchemaSnafu)?;

    let mut rows = Vec::with_capacity(objects.len());
    for (line, map) in objects {
        let mut row = Vec::with_capacity(schema.len());
        for field in schema.columns() {
            let cell = match map.get(&field.name) {
                None | Some(serde_json::Value::Null) => Value::Null,
                Some(json) => {
                    let raw: Value = match serde_json::from_value(json.clone()) {
                        Ok(v) => v,
                        Err(_) => {
                            return InvalidRowSnafu {
                                line,
                                msg: format!("unsupported value for column {}", field.name),
                            }
                            .fail();
                        }
                    };
                    raw.coerce_to(field.data_type).context(InvalidRowSnafu {
                        line,
                        msg: format!("column {} expects {}", field.name, field.data_type),
                    })?
                }
            };
            row.push(cell);
        }
        rows.push(row);
    }
    RowBatch::new(schema, rows).context(RowsSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> LogicalSchema {
        parse_schema("id:int64!, state:utf8, amount:float64, paid:bool").expect("schema")
    }

    #[test]
    fn schema_spec_parses_nullability() {
        let s = schema();
        assert_eq!(s.len(), 4);
        assert!(!s.columns()[0].nullable);
        assert!(s.columns()[1].nullable);
        assert_eq!(s.columns()[2].data_type, LogicalDataType::Float64);
        assert!(parse_schema("id").is_err());
        assert!(parse_schema("id:decimal").is_err());
    }

    #[test]
    fn predicate_literals_follow_column_types() {
        let s = schema();
        assert_eq!(
            parse_predicate("amount = 7", &s).expect("parse"),
            Predicate::eq("amount", 7.0)
        );
        assert_eq!(
            parse_predicate("state = CA AND id >= 3", &s).expect("parse"),
            Predicate::eq("state", "CA").and(Predicate::gt_eq("id", 3))
        );
        assert_eq!(
            parse_predicate("state = 'New York'", &s).expect("parse"),
            Predicate::eq("state", "New York")
        );
    }

    #[test]
    fn predicate_precedence_and_forms() {
        let s = schema();
        assert_eq!(
            parse_predicate("id = 1 OR id = 2 AND paid = true", &s).expect("parse"),
            Predicate::eq("id", 1).or(Predicate::eq("id", 2).and(Predicate::eq("paid", true)))
        );
        assert_eq!(
            parse_predicate("NOT (state IS NULL)", &s).expect("parse"),
            Predicate::is_null("state").not()
        );
        assert_eq!(
            parse_predicate("state is not null", &s).expect("parse"),
            Predicate::is_not_null("state")
        );
        assert_eq!(
            parse_predicate("id IN (1, 2)", &s).expect("parse"),
            Predicate::in_list("id", [Value::Int64(1), Value::Int64(2)])
        );
        assert_eq!(parse_predicate("  ", &s).expect("parse"), Predicate::True);
    }

    #[test]
    fn predicate_errors_are_reported() {
        let s = schema();
        assert!(parse_predicate("zip = 1", &s).is_err());
        assert!(parse_predicate("id = abc", &s).is_err());
        assert!(parse_predicate("id = 1 id", &s).is_err());
        assert!(parse_predicate("state = 'open", &s).is_err());
    }

    #[test]
    fn assignments_are_typed() {
        let s = schema();
        assert_eq!(
            parse_assignment("amount=0.5", &s).expect("parse"),
            ("amount".to_string(), Value::Float64(0.5))
        );
        assert_eq!(
            parse_assignment("state='WA'", &s).expect("parse"),
            ("state".to_string(), Value::from("WA"))
        );
        assert_eq!(
            parse_assignment("state=null", &s).expect("parse"),
            ("state".to_string(), Value::Null)
        );
        assert!(parse_assignment("zip=1", &s).is_err());
        assert!(parse_assignment("amount", &s).is_err());
    }

    #[test]
    fn jsonl_rows_fill_missing_and_add_extra_columns() {
        let text = "{\"id\": 1, \"state\": \"CA\", \"amount\": 2}\n\n{\"id\": 2, \"zip\": \"98101\"}\n";
        let batch = rows_from_jsonl(text, &schema()).expect("rows");
        assert_eq!(batch.num_rows(), 2);
        // `paid` appears on no line and is left to the table's schema check.
        let names: Vec<&str> = batch.schema().column_names().collect();
        assert_eq!(names, vec!["id", "state", "amount", "zip"]);
        assert_eq!(batch.rows()[0][2], Value::Float64(2.0));
        assert_eq!(batch.rows()[1][1], Value::Null);
        assert_eq!(batch.rows()[1][3], Value::from("98101"));
    }

    #[test]
    fn jsonl_extra_columns_widen_integers_to_floats() {
        let text = "{\"id\": 1, \"score\": 1}\n{\"id\": 2, \"score\": 2.5}\n{\"id\": 3}";
        let batch = rows_from_jsonl(text, &schema()).expect("rows");
        let score = batch.schema().field("score").expect("score column");
        assert_eq!(score.data_type, LogicalDataType::Float64);
        assert_eq!(batch.rows()[0][1], Value::Float64(1.0));
        assert_eq!(batch.rows()[1][1], Value::Float64(2.5));
        assert_eq!(batch.rows()[2][1], Value::Null);

        let text = "{\"id\": 1, \"tag\": 1}\n{\"id\": 2, \"tag\": \"x\"}";
        let err = rows_from_jsonl(text, &schema()).expect_err("mixed types");
        assert!(err.to_string().contains("line 2"), "{err}");
    }

    #[test]
    fn jsonl_without_a_required_column_omits_it() {
        let batch = rows_from_jsonl("{\"state\": \"CA\"}", &schema()).expect("rows");
        assert!(batch.schema().field("id").is_none());
        assert_eq!(batch.schema().len(), 1);
    }

    #[test]
    fn jsonl_type_errors_name_the_line() {
        let err = rows_from_jsonl("{\"id\": 1}\n{\"id\": \"x\"}", &schema()).expect_err("bad id");
        assert!(err.to_string().contains("line 2"), "{err}");
        assert!(rows_from_jsonl("[1]", &schema()).is_err());
        assert!(rows_from_jsonl("{\"id\": null}", &schema()).is_err());
    }
}
