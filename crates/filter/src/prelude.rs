//! Builtins defined in the filter language itself, compiled once per process.

use crate::ast::FuncDef;
use crate::error::{FilterError, Result};
use crate::parser;
use std::sync::OnceLock;

const SOURCE: &str = r#"
def todate: strftime("%Y-%m-%dT%H:%M:%SZ");
def todateiso8601: strftime("%Y-%m-%dT%H:%M:%SZ");
def fromdate: fromdateiso8601;
def date: todate;
def dateadd(u; n): . + n;
def datesub(u; n): . - n;
def finites: select(isinfinite or isnan | not);
def normals: select(isnormal);
def combinations:
  if length == 0 then []
  else .[0][] as $x | (.[1:] | combinations) as $w | [$x] + $w
  end;
def combinations(n): . as $dot | [range(n)] | map($dot) | combinations;
def walk(f):
  def w: if type == "object" then map_values(w) elif type == "array" then map(w) else . end | f;
  w;
def env: $ENV;
def INDEX(stream; idx_expr): reduce stream as $row ({}; .[$row | idx_expr | tostring] |= $row);
def INDEX(idx_expr): INDEX(.[]; idx_expr);
def any(generator; condition): isempty(first(generator | condition or empty)) | not;
def all(generator; condition): isempty(first(generator | condition and empty));
def any(condition): any(.[]; condition);
def all(condition): all(.[]; condition);
def IN(s): any(s == .; .);
def IN(src; s): any(src == s; .);
def index($i): indices($i) | .[0];
def rindex($i): indices($i) | .[-1:][0];
def paths: path(..) | select(length > 0);
def paths(node_filter): . as $dot | paths | select(. as $p | $dot | getpath($p) | node_filter);
def leaf_paths: paths(scalars);
def del(f): delpaths([path(f)]);
def pick(pathexps): . as $top | reduce path(pathexps) as $p (null; setpath($p; $top | getpath($p)));
def toarray: if type == "array" then . else [.] end;
def add(f): reduce f as $x (null; . + $x);
def nth($n; f): if $n < 0 then error("Out of bounds negative array index") else last(limit($n + 1; f)) end;
def transpose:
  if . == [] then []
  else . as $in
    | (map(length) | max) as $max
    | [range(0; $max) as $j | [range(0; $in | length) as $i | $in[$i][$j]]]
  end;
def tostream: path(def r: (.[]? | r), .; r) as $p | getpath($p) | reduce path(.[]?) as $q ([$p, .]; [$p + $q]);
def fromstream(f):
  { x: null, e: false } as $init
  | foreach f as $i ($init;
      if .e then $init else . end
      | if $i | length == 2
        then setpath(["e"]; $i[0] | length == 0) | setpath(["x"] + $i[0]; $i[1])
        else setpath(["e"]; $i[0] | length == 1)
        end;
      if .e then .x else empty end);
def truncate_stream(stream): . as $n | null | stream | . as $input | if (.[0] | length) > $n then setpath([0]; .[0][$n:]) else empty end;
def debug(msg): (msg | debug | empty), .;
def have_literal_numbers: false;
def have_decnum: false;
"#;

static PRELUDE: OnceLock<Result<Vec<FuncDef>>> = OnceLock::new();

/// Prelude definitions in source order; calls refer to them by index.
pub(crate) fn definitions() -> Result<&'static [FuncDef]> {
    match PRELUDE.get_or_init(|| parser::parse_definitions(SOURCE)) {
        Ok(defs) => Ok(defs),
        Err(err) => Err(FilterError::clone(err)),
    }
}
