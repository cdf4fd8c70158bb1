//! A1-style cell references.

/// Converts a zero-based column index to its letters (0 → "A", 26 → "AA").
pub fn col_to_letters(col: usize) -> String {
    let mut col = col + 1;
    let mut letters = Vec::<u8>::new();
    while col > 0 {
        col -= 1;
        letters.push(b'A' + (col % 26) as u8);
        col /= 26;
    }
    letters.iter().rev().map(|letter| char::from(*letter)).collect()
}

/// Converts zero-based row and column indexes to a reference such as "B3".
pub fn index_to_reference(row: usize, col: usize) -> String {
    format!("{}{}", col_to_letters(col), row + 1)
}

/// Parses a reference such as "B3" or "$B$3" into zero-based (row, column) indexes.
pub fn reference_to_index(reference: &str) -> Option<(usize, usize)> {
    let reference = reference.trim().replace('$', "");
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() || !letters.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let col = letters
        .bytes()
        .try_fold(0usize, |acc, letter| {
            acc.checked_mul(26)?
                .checked_add((letter.to_ascii_uppercase() - b'A') as usize + 1)
        })?;
    let row = digits.parse::<usize>().ok()?;
    if row == 0 {
        return None;
    }
    Some((row - 1, col - 1))
}

/// Moves the relative references of an A1-style formula by `rows` and `cols`, the way a shared
/// formula is filled from its anchor cell. Absolute parts, quoted text and function names are kept.
/// A reference moved before the first row or column becomes `#REF!`.
pub fn shift_formula(formula: &str, rows: isize, cols: isize) -> String {
    let mut shifted = String::with_capacity(formula.len());
    let mut chars = formula.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            // String literals and quoted sheet names; a doubled quote reopens the same run.
            '"' | '\'' => {
                shifted.push(c);
                for next in chars.by_ref() {
                    shifted.push(next);
                    if next == c {
                        break;
                    }
                }
            }
            c if is_token_char(c) => {
                let mut token = String::from(c);
                while let Some(&next) = chars.peek().filter(|next| is_token_char(**next)) {
                    token.push(next);
                    chars.next();
                }
                match chars.peek() {
                    Some('(') | Some('!') => shifted.push_str(&token),
                    _ => shifted.push_str(&shift_reference(&token, rows, cols).unwrap_or(token)),
                }
            }
            _ => shifted.push(c),
        }
    }
    shifted
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '$' | '_' | '.')
}

/// `None` when `token` is not a cell reference.
fn shift_reference(token: &str, rows: isize, cols: isize) -> Option<String> {
    let (is_col_absolute, rest) = token.strip_prefix('$').map_or((false, token), |rest| (true, rest));
    let split = rest.find(|c: char| !c.is_ascii_uppercase()).unwrap_or(rest.len());
    let (letters, rest) = rest.split_at(split);
    let (is_row_absolute, digits) = rest.strip_prefix('$').map_or((false, rest), |rest| (true, rest));
    if letters.is_empty() || letters.len() > 3 || digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let (row, col) = reference_to_index(&format!("{}{}", letters, digits))?;
    let row = if is_row_absolute { Some(row) } else { row.checked_add_signed(rows) };
    let col = if is_col_absolute { Some(col) } else { col.checked_add_signed(cols) };
    let (Some(row), Some(col)) = (row, col) else {
        return Some("#REF!".to_owned());
    };
    Some(format!(
        "{}{}{}{}",
        if is_col_absolute { "$" } else { "" },
        col_to_letters(col),
        if is_row_absolute { "$" } else { "" },
        row + 1,
    ))
}
