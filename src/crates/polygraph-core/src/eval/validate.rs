//! Static validation of the guard sublanguage
//!
//! Guards are a restricted subset of a conventional expression language:
//! comparisons, logical connectives, parentheses, identifiers and literals.
//! Everything else is rejected here, before compilation: member access,
//! arithmetic, function calls, and a set of characters that have no place in
//! a boolean guard. Rejection is purely lexical, which is what keeps
//! missing-variable extraction (also lexical) in lockstep with what a guard
//! can actually reference.

use crate::error::EvalError;

const ILLEGAL_CHARS: [char; 11] = ['{', '}', '[', ']', ';', ':', '?', '@', '#', '$', '\\'];
const ARITHMETIC_OPS: [char; 5] = ['+', '-', '*', '/', '%'];

/// Check a guard against the sublanguage rules. Empty and whitespace-only
/// guards are valid (they always evaluate to true).
pub fn validate(cond: &str) -> Result<(), EvalError> {
    let cond = cond.trim();
    if cond.is_empty() {
        return Ok(());
    }

    for ch in ILLEGAL_CHARS {
        if cond.contains(ch) {
            return Err(EvalError::IllegalCharacter(ch));
        }
    }

    if cond.contains('.') {
        return Err(EvalError::DotAccess);
    }

    for op in ARITHMETIC_OPS {
        if cond.contains(op) {
            return Err(EvalError::ArithmeticOperator(op));
        }
    }

    // Function-call scan: an identifier immediately preceding '(' with only
    // whitespace in between.
    let chars: Vec<char> = cond.chars().collect();
    for i in 0..chars.len() {
        if chars[i] != '(' {
            continue;
        }
        let mut j = i as isize - 1;
        while j >= 0 && chars[j as usize].is_whitespace() {
            j -= 1;
        }
        if j >= 0 && (chars[j as usize].is_alphabetic() || chars[j as usize] == '_') {
            let mut k = j;
            while k >= 0
                && (chars[k as usize].is_alphanumeric() || chars[k as usize] == '_')
            {
                k -= 1;
            }
            let ident: String = chars[(k + 1) as usize..=(j as usize)].iter().collect();
            if !ident.is_empty() {
                return Err(EvalError::FunctionCall(ident));
            }
        }
    }

    Ok(())
}
