//! Functions a generated query may call.
//!
//! Anything not listed here is refused, which keeps catalog readers such as
//! `query_to_xml`, file readers and extension loaders out of reach.

use crate::store::StoreBackend;

/// Aggregates, window functions and scalar helpers both stores provide.
const COMMON: &[&str] = &[
    "count", "sum", "avg", "min", "max",
    "abs", "round", "ceil", "ceiling", "floor", "sqrt", "power", "pow", "exp", "ln", "log",
    "log10", "mod", "sign", "trunc", "pi",
    "lower", "upper", "length", "trim", "ltrim", "rtrim", "replace", "substr", "substring",
    "concat", "concat_ws",
    "coalesce", "nullif",
    "row_number", "rank", "dense_rank", "ntile", "lag", "lead", "first_value", "last_value",
    "nth_value", "percent_rank", "cume_dist",
    "current_date", "current_time", "current_timestamp",
];

const SQLITE: &[&str] = &[
    "total", "group_concat", "ifnull", "iif", "instr", "typeof", "printf", "format",
    "date", "time", "datetime", "julianday", "strftime", "unixepoch",
];

const POSTGRES: &[&str] = &[
    "string_agg", "array_agg", "bool_and", "bool_or", "every", "mode",
    "stddev", "stddev_pop", "stddev_samp", "variance", "var_pop", "var_samp",
    "percentile_cont", "percentile_disc", "corr", "covar_pop", "covar_samp",
    "greatest", "least", "cbrt", "div", "width_bucket",
    "char_length", "character_length", "strpos", "position", "left", "right", "lpad", "rpad",
    "initcap", "split_part", "reverse", "repeat",
    "date_trunc", "date_part", "extract", "to_char", "to_date", "to_timestamp", "to_number",
    "now", "age", "make_date",
];

/// Returns whether `name` may be called on `backend`. Case is ignored.
pub(crate) fn is_allowed(backend: StoreBackend, name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let extra = match backend {
        StoreBackend::Sqlite => SQLITE,
        StoreBackend::Postgres => POSTGRES,
    };
    COMMON.contains(&name.as_str()) || extra.contains(&name.as_str())
}
