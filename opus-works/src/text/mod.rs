//! String algebra used to compare catalog names with literal track titles
//!
//! Everything here is pure: no cache access, no I/O. The reconciler layers
//! hierarchy-aware behavior on top of these primitives.

pub mod boil;
pub mod diff;
pub mod lcs;
pub mod roman;
pub mod rules;
pub mod strip;
pub mod tokens;

pub use boil::boil;
pub use diff::TitleDiffer;
pub use lcs::{longest_common_sequence, longest_common_substring};
pub use roman::{from_roman, replace_roman_numerals, strip_numbering};
pub use rules::{ConfigIssue, Replacement, Synonym, TextRules};
pub use strip::{find_parent, strip_parent, ParentMatch, StripMode};
