use crate::error::{Error, Result};
use crate::formula::{Clause, Formula, Literal};
use std::io::{BufRead, BufReader, Read, Write};

pub fn parse<R: Read>(reader: R) -> Result<Formula> {
    let reader = BufReader::new(reader);

    let mut clauses = vec![];
    let mut header = None;
    let mut clause = vec![];

    for line in reader.lines() {
        let line = line?;
        let mut line = line.split_whitespace().peekable();

        match line.peek() {
            Some(&"c") | None => continue,
            Some(&"%") => break,
            Some(&"p") => {
                let _ = line.next();

                if line.next() != Some("cnf") {
                    return Err(Error::Dimacs("missing 'cnf'".into()));
                }

                let num_variables = line
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| Error::Dimacs("invalid num_variables".into()))?;

                let num_clauses = line
                    .next()
                    .and_then(|c| c.parse::<usize>().ok())
                    .ok_or_else(|| Error::Dimacs("invalid num_clauses".into()))?;
                header = Some((num_variables, num_clauses));
            }
            Some(_) => {
                let (_, num_clauses) =
                    header.ok_or_else(|| Error::Dimacs("missing 'p' line before clauses".into()))?;

                // Clauses may span several lines; only a `0` terminates one.
                for x in line {
                    match parse_literal(x)? {
                        Some(l) => clause.push(l),
                        None => clauses.push(Clause::new(clause.drain(..))),
                    }
                }

                if clauses.len() >= num_clauses {
                    break;
                }
            }
        }
    }

    let (num_variables, _) = header.ok_or_else(|| Error::Dimacs("missing 'p' line before clauses".into()))?;
    if !clause.is_empty() {
        clauses.push(Clause::new(clause));
    }

    Ok(Formula::with_variables(num_variables, clauses))
}

fn parse_literal(s: &str) -> Result<Option<Literal>> {
    let l = s
        .parse::<i64>()
        .map_err(|_| Error::Dimacs(format!("invalid literal '{}'", s)))?;
    Ok(Literal::from_dimacs(l))
}

/// Writes `p cnf <vars> <clauses>` followed by one `0`-terminated line per clause.
pub fn write<'a, W: Write>(
    mut writer: W,
    num_variables: usize,
    clauses: impl ExactSizeIterator<Item = &'a Clause>,
) -> Result<()> {
    writeln!(writer, "p cnf {} {}", num_variables, clauses.len())?;
    for clause in clauses {
        for literal in clause.literals() {
            write!(writer, "{} ", literal.to_dimacs())?;
        }
        writeln!(writer, "0")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_formula<W: Write>(writer: W, formula: &Formula) -> Result<()> {
    write(writer, formula.num_variables(), formula.clauses.iter())
}
