// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

/// Builds the diagnostic name of an element from its kind and an optional
/// user-supplied name, e.g. `mutex` or `mutex:cache`.
pub(crate) fn element_name(kind: &str, name: Option<&str>) -> String {
    match name {
        Some(name) if !name.is_empty() => format!("{kind}:{name}"),
        _ => kind.to_owned(),
    }
}
