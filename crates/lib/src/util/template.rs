//! `${name}` substitution for installer arguments and container environment.
//!
//! Only names present in the variable table are replaced; anything else,
//! including shell-style `$HOME` or unknown `${FOO}`, passes through verbatim.

use std::collections::BTreeMap;

pub fn render(template: &str, vars: &BTreeMap<&str, String>) -> String {
  let mut out = String::with_capacity(template.len());
  let mut rest = template;

  while let Some(start) = rest.find("${") {
    out.push_str(&rest[..start]);
    let after = &rest[start + 2..];

    match after.find('}') {
      Some(end) => {
        let name = &after[..end];
        match vars.get(name) {
          Some(value) => out.push_str(value),
          None => {
            out.push_str("${");
            out.push_str(name);
            out.push('}');
          }
        }
        rest = &after[end + 1..];
      }
      None => {
        out.push_str(&rest[start..]);
        rest = "";
      }
    }
  }

  out.push_str(rest);
  out
}
