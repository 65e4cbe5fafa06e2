//! Expression string detection and node-rename rewriting.
//!
//! Expression-bearing parameter values are strings prefixed with `=` whose
//! body contains a `{{ }}` mustache block, e.g. `="={{ $json.foo }}"`.
//! Plain strings are left untouched everywhere below.

/// Whether a parameter leaf value is an expression rather than a literal.
pub fn is_expression(value: &str) -> bool {
	value.starts_with('=') && value.contains("{{")
}

/// Rewrite every reference to `old_name` inside an expression string to
/// `new_name`, covering the two node-reference forms used throughout
/// parameter expressions: `$("Name")` / `$('Name')` and `$node["Name"]`.
///
/// Non-expression strings are returned unchanged.
pub fn rewrite_node_references(expression: &str, old_name: &str, new_name: &str) -> String {
	if !is_expression(expression) {
		return expression.to_string();
	}

	let mut result = expression.to_string();
	for (open, close) in [('"', '"'), ('\'', '\'')] {
		result = replace_quoted_call(&result, "$(", old_name, new_name, open, close);
		result = replace_quoted_index(&result, "$node[", old_name, new_name, open, close);
	}
	result
}

fn replace_quoted_call(
	text: &str,
	prefix: &str,
	old_name: &str,
	new_name: &str,
	open: char,
	close: char,
) -> String {
	let from = format!("{prefix}{open}{old_name}{close})");
	let to = format!("{prefix}{open}{new_name}{close})");
	text.replace(&from, &to)
}

fn replace_quoted_index(
	text: &str,
	prefix: &str,
	old_name: &str,
	new_name: &str,
	open: char,
	close: char,
) -> String {
	let from = format!("{prefix}{open}{old_name}{close}]");
	let to = format!("{prefix}{open}{new_name}{close}]");
	text.replace(&from, &to)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn detects_expression_prefix_and_mustache() {
		assert!(is_expression("={{ $json.foo }}"));
		assert!(!is_expression("plain value"));
		assert!(!is_expression("{{ not prefixed }}"));
	}

	#[test]
	fn rewrites_call_style_reference() {
		let expr = r#"={{ $("Old Name").item.json.x }}"#;
		let rewritten = rewrite_node_references(expr, "Old Name", "New Name");
		assert_eq!(rewritten, r#"={{ $("New Name").item.json.x }}"#);
	}

	#[test]
	fn rewrites_node_index_style_reference() {
		let expr = r#"={{ $node["Old Name"].json.x }}"#;
		let rewritten = rewrite_node_references(expr, "Old Name", "New Name");
		assert_eq!(rewritten, r#"={{ $node["New Name"].json.x }}"#);
	}

	#[test]
	fn leaves_plain_strings_untouched() {
		assert_eq!(rewrite_node_references("Old Name", "Old Name", "New Name"), "Old Name");
	}
}

// vim: ts=4
