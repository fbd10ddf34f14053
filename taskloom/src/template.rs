/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Template expansion (C2): substitutes `${key}` placeholders in a task's
//! command string.
//!
//! Lookup order is input data first, then accumulated process context.
//! Unknown keys are left literal on purpose — that lets the underlying
//! command surface its own, clearer error rather than this layer guessing.
//! Expansion is a single left-to-right pass; a value that itself contains
//! `${...}` is not recursively expanded.

use std::collections::HashMap;

/// Expands every `${key}` occurrence in `command` using `input_data` then
/// `context`, in that priority order.
pub fn expand(command: &str, input_data: &HashMap<String, String>, context: &HashMap<String, String>) -> String {
    let mut result = String::with_capacity(command.len());
    let bytes = command.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = command[i + 2..].find('}') {
                let key = &command[i + 2..i + 2 + end];
                match input_data.get(key).or_else(|| context.get(key)) {
                    Some(value) => {
                        result.push_str(value);
                    }
                    None => {
                        // Unknown key: leave the placeholder literal.
                        result.push_str(&command[i..i + 2 + end + 1]);
                    }
                }
                i += 2 + end + 1;
                continue;
            }
        }
        // Safe: command is valid UTF-8 and we only ever skip whole chars.
        let ch_len = command[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
        result.push_str(&command[i..i + ch_len]);
        i += ch_len;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_from_input_data() {
        let input = map(&[("input_file", "/x"), ("user_id", "u")]);
        let context = HashMap::new();
        let out = expand("echo ${input_file}--${user_id}", &input, &context);
        assert_eq!(out, "echo /x--u");
    }

    #[test]
    fn substitutes_from_context_when_absent_from_input() {
        let input = HashMap::new();
        let context = map(&[("A_exit_code", "0")]);
        let out = expand("echo ${A_exit_code}", &input, &context);
        assert_eq!(out, "echo 0");
    }

    #[test]
    fn input_data_takes_priority_over_context() {
        let input = map(&[("key", "from_input")]);
        let context = map(&[("key", "from_context")]);
        let out = expand("${key}", &input, &context);
        assert_eq!(out, "from_input");
    }

    #[test]
    fn unknown_key_left_literal() {
        let input = HashMap::new();
        let context = HashMap::new();
        let out = expand("echo ${mystery}", &input, &context);
        assert_eq!(out, "echo ${mystery}");
    }

    #[test]
    fn no_recursive_expansion() {
        let input = map(&[("a", "${b}"), ("b", "final")]);
        let context = HashMap::new();
        let out = expand("${a}", &input, &context);
        assert_eq!(out, "${b}");
    }
}
