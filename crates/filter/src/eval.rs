//! Streaming evaluator.
//!
//! Every expression pushes its outputs into a sink one at a time, so a
//! consumer that stops early (`limit`, `first`, the caller's record cap)
//! never pays for the rest of the stream. Non-local exits travel back up the
//! call chain as [`Unwind`] values.

use crate::ast::{AssignOp, Ast, BinOp, FuncDef, ObjectKey, Param, Pattern, PatternKey, StrSegment};
use crate::error::EvalError;
use crate::value::{self, compare, truthy, type_name};
use crate::{builtins, format, paths, prelude};
use serde_json::{json, Map, Value};
use std::cell::Cell;
use std::cmp::Ordering;
use std::ops::ControlFlow;

pub(crate) type Flow = Result<(), Unwind>;

/// Consumer of value-mode outputs.
pub(crate) type Sink<'s> = dyn FnMut(Value) -> Flow + 's;

/// Consumer of path-mode outputs: the path and the value found there.
pub(crate) type PathSink<'s> = dyn FnMut(Vec<Value>, Value) -> Flow + 's;

/// Consumer of a scope extended with new bindings.
pub(crate) type Scoped<'s> = dyn FnMut(Env<'_>) -> Flow + 's;

/// Why evaluation is leaving a stream before it is exhausted.
#[derive(Debug)]
pub(crate) enum Unwind {
    Error(EvalError),
    /// `break` to the label with this id
    Break(usize),
    /// A consumer downstream of a `try` failed; the original cause is held by
    /// that `try` until it has unwound past its own body.
    Downstream,
}

impl From<EvalError> for Unwind {
    fn from(error: EvalError) -> Self {
        Self::Error(error)
    }
}

/// Lexical scope, innermost binding first.
#[derive(Clone, Copy, Default)]
pub(crate) struct Env<'a>(Option<&'a Node<'a>>);

pub(crate) struct Node<'a> {
    frame: Frame<'a>,
    parent: Env<'a>,
}

enum Frame<'a> {
    Var {
        name: &'a str,
        value: Value,
    },
    /// Filter parameter, evaluated in the scope of the call site
    Closure {
        name: &'a str,
        body: &'a Ast,
        env: Env<'a>,
    },
    Def(&'a FuncDef),
    Label {
        name: &'a str,
        id: usize,
    },
}

enum Callee<'a> {
    Def { def: &'a FuncDef, scope: Env<'a> },
    Closure { body: &'a Ast, env: Env<'a> },
}

impl<'a> Env<'a> {
    pub(crate) fn empty() -> Self {
        Self(None)
    }

    fn with(self, frame: Frame<'a>) -> Node<'a> {
        Node {
            frame,
            parent: self,
        }
    }

    fn nodes(self) -> impl Iterator<Item = &'a Node<'a>> {
        std::iter::successors(self.0, |node| node.parent.0)
    }

    fn var(self, name: &str) -> Option<&'a Value> {
        self.nodes().find_map(|node| match &node.frame {
            Frame::Var { name: bound, value } if *bound == name => Some(value),
            _ => None,
        })
    }

    fn label(self, name: &str) -> Option<usize> {
        self.nodes().find_map(|node| match node.frame {
            Frame::Label { name: bound, id } if bound == name => Some(id),
            _ => None,
        })
    }

    fn function(self, name: &str, arity: usize) -> Option<Callee<'a>> {
        let mut current = self;
        while let Some(node) = current.0 {
            match &node.frame {
                Frame::Closure {
                    name: bound,
                    body,
                    env,
                } if arity == 0 && *bound == name => {
                    return Some(Callee::Closure { body, env: *env });
                }
                Frame::Def(def) if def.name == name && def.params.len() == arity => {
                    return Some(Callee::Def {
                        def,
                        scope: current,
                    });
                }
                _ => {}
            }
            current = node.parent;
        }
        None
    }
}

impl<'a> Node<'a> {
    fn env(&self) -> Env<'_> {
        Env(Some(self))
    }
}

const INTERRUPT_EVERY: u32 = 1024;
const STACK_BUDGET: usize = 768 * 1024;

/// Per-run evaluation state.
pub(crate) struct Cx<'c> {
    interrupted: &'c dyn Fn() -> bool,
    pub(crate) prelude: &'static [FuncDef],
    next_label: Cell<usize>,
    ticks: Cell<u32>,
    stack_base: usize,
}

#[inline(never)]
fn stack_position() -> usize {
    let marker = 0u8;
    std::ptr::addr_of!(marker) as usize
}

/// Run `ast` against `input`, feeding each output to `sink` until it breaks.
pub(crate) fn run(
    ast: &Ast,
    input: &Value,
    interrupted: &dyn Fn() -> bool,
    sink: &mut dyn FnMut(Value) -> ControlFlow<()>,
) -> Result<(), EvalError> {
    let cx = Cx {
        interrupted,
        prelude: prelude::definitions().unwrap_or(&[]),
        next_label: Cell::new(0),
        ticks: Cell::new(0),
        stack_base: stack_position(),
    };
    let stop = cx.fresh_label();
    let result = cx.eval(ast, input, Env::empty(), &mut |value| match sink(value) {
        ControlFlow::Continue(()) => Ok(()),
        ControlFlow::Break(()) => Err(Unwind::Break(stop)),
    });
    match result {
        Ok(()) => Ok(()),
        Err(Unwind::Break(id)) if id == stop => Ok(()),
        Err(Unwind::Error(error)) => Err(error),
        Err(Unwind::Break(_) | Unwind::Downstream) => {
            Err(EvalError::type_error("break escaped its label"))
        }
    }
}

/// Hold whatever a downstream consumer raised and signal [`Unwind::Downstream`].
pub(crate) fn park(slot: &mut Option<Unwind>, flow: Flow) -> Flow {
    flow.map_err(|unwind| {
        *slot = Some(unwind);
        Unwind::Downstream
    })
}

/// Split the result of a guarded body into the error it raised itself (which
/// the guard may handle) and everything that must keep unwinding.
pub(crate) fn settle(result: Flow, parked: Option<Unwind>) -> Result<Option<EvalError>, Unwind> {
    match result {
        Ok(()) => Ok(None),
        Err(Unwind::Downstream) => Err(parked.unwrap_or(Unwind::Downstream)),
        Err(Unwind::Error(EvalError::Interrupted)) => Err(EvalError::Interrupted.into()),
        Err(Unwind::Error(error)) => Ok(Some(error)),
        Err(other) => Err(other),
    }
}

/// Swallow the break aimed at `id`.
pub(crate) fn caught(result: Flow, id: usize) -> Flow {
    match result {
        Err(Unwind::Break(target)) if target == id => Ok(()),
        other => other,
    }
}

pub(crate) fn invalid_path(value: &Value) -> EvalError {
    EvalError::type_error(format!(
        "Invalid path expression with result {}",
        value::preview(value)
    ))
}

pub(crate) fn apply_binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let ordered = |want: fn(Ordering) -> bool| Value::Bool(want(compare(lhs, rhs)));
    Ok(match op {
        BinOp::Add => value::add(lhs, rhs)?,
        BinOp::Sub => value::subtract(lhs, rhs)?,
        BinOp::Mul => value::multiply(lhs, rhs)?,
        BinOp::Div => value::divide(lhs, rhs)?,
        BinOp::Rem => value::remainder(lhs, rhs)?,
        BinOp::Eq => Value::Bool(value::equal(lhs, rhs)),
        BinOp::Ne => Value::Bool(!value::equal(lhs, rhs)),
        BinOp::Lt => ordered(Ordering::is_lt),
        BinOp::Le => ordered(Ordering::is_le),
        BinOp::Gt => ordered(Ordering::is_gt),
        BinOp::Ge => ordered(Ordering::is_ge),
    })
}

impl Cx<'_> {
    fn enter(&self) -> Result<(), EvalError> {
        self.tick()?;
        if stack_position().abs_diff(self.stack_base) > STACK_BUDGET {
            return Err(EvalError::type_error("filter recursion is too deep"));
        }
        Ok(())
    }

    /// Count one step of work, polling the interrupt check now and then.
    pub(crate) fn tick(&self) -> Result<(), EvalError> {
        let ticks = self.ticks.get().wrapping_add(1);
        self.ticks.set(ticks);
        if ticks % INTERRUPT_EVERY == 0 && (self.interrupted)() {
            return Err(EvalError::Interrupted);
        }
        Ok(())
    }

    pub(crate) fn fresh_label(&self) -> usize {
        let id = self.next_label.get();
        self.next_label.set(id + 1);
        id
    }

    pub(crate) fn collect<'a>(&self, ast: &'a Ast, input: &Value, env: Env<'a>) -> Result<Vec<Value>, Unwind> {
        let mut items = Vec::new();
        self.eval(ast, input, env, &mut |value| {
            items.push(value);
            Ok(())
        })?;
        Ok(items)
    }

    pub(crate) fn first_output<'a>(&self, ast: &'a Ast, input: &Value, env: Env<'a>) -> Result<Option<Value>, Unwind> {
        let id = self.fresh_label();
        let mut first = None;
        let result = self.eval(ast, input, env, &mut |value| {
            first = Some(value);
            Err(Unwind::Break(id))
        });
        caught(result, id)?;
        Ok(first)
    }

    pub(crate) fn eval<'a>(&self, ast: &'a Ast, input: &Value, env: Env<'a>, out: &mut Sink<'_>) -> Flow {
        self.enter()?;
        match ast {
            Ast::Identity => out(input.clone()),
            Ast::RecurseAll => self.recurse_all(input, out),
            Ast::Literal(value) => out(value.clone()),
            Ast::Str { format, parts } => {
                self.interpolate(parts, format.as_deref(), input, env, String::new(), out)
            }
            Ast::Format(name) => out(Value::String(format::apply(name, input)?)),
            Ast::Var(name) => match env.var(name) {
                Some(value) => out(value.clone()),
                None => Err(EvalError::type_error(format!("${name} is not defined")).into()),
            },
            Ast::EnvVars => out(builtins::env_object()),
            Ast::Index { target, index } => self.eval(index, input, env, &mut |key| {
                self.eval(target, input, env, &mut |container| {
                    out(value::index(&container, &key)?)
                })
            }),
            Ast::Slice { target, from, to } => {
                self.bounds(from.as_deref(), to.as_deref(), input, env, &mut |from, to| {
                    self.eval(target, input, env, &mut |container| {
                        out(value::slice(&container, from.as_ref(), to.as_ref())?)
                    })
                })
            }
            Ast::Iterate(target) => self.eval(target, input, env, &mut |container| {
                for item in value::into_items(container)? {
                    out(item)?;
                }
                Ok(())
            }),
            Ast::Array(None) => out(Value::Array(Vec::new())),
            Ast::Array(Some(body)) => out(Value::Array(self.collect(body, input, env)?)),
            Ast::Object(entries) => self.object(entries, input, env, Map::new(), out),
            Ast::Neg(inner) => self.eval(inner, input, env, &mut |value| match value {
                Value::Number(n) => out(value::number(-n.as_f64().unwrap_or(0.0))),
                other => Err(EvalError::type_error(format!(
                    "{} cannot be negated",
                    value::describe(&other)
                ))
                .into()),
            }),
            Ast::Pipe(lhs, rhs) => {
                self.eval(lhs, input, env, &mut |value| self.eval(rhs, &value, env, &mut *out))
            }
            Ast::Comma(lhs, rhs) => {
                self.eval(lhs, input, env, &mut *out)?;
                self.eval(rhs, input, env, out)
            }
            Ast::Binary { op, lhs, rhs } => self.eval(rhs, input, env, &mut |r| {
                self.eval(lhs, input, env, &mut |l| out(apply_binary(*op, &l, &r)?))
            }),
            Ast::And(lhs, rhs) => self.eval(lhs, input, env, &mut |l| {
                if !truthy(&l) {
                    return out(Value::Bool(false));
                }
                self.eval(rhs, input, env, &mut |r| out(Value::Bool(truthy(&r))))
            }),
            Ast::Or(lhs, rhs) => self.eval(lhs, input, env, &mut |l| {
                if truthy(&l) {
                    return out(Value::Bool(true));
                }
                self.eval(rhs, input, env, &mut |r| out(Value::Bool(truthy(&r))))
            }),
            Ast::Alternative(lhs, rhs) => {
                let mut any = false;
                let mut parked = None;
                let result = self.eval(lhs, input, env, &mut |value| {
                    if !truthy(&value) {
                        return Ok(());
                    }
                    any = true;
                    park(&mut parked, out(value))
                });
                // errors raised by the left side only mean "no value"
                settle(result, parked)?;
                if any {
                    Ok(())
                } else {
                    self.eval(rhs, input, env, out)
                }
            }
            Ast::Assign { op, lhs, rhs } => self.assign(*op, lhs, rhs, input, env, out),
            Ast::If { branches, otherwise } => {
                self.branch(branches, otherwise.as_deref(), input, env, out)
            }
            Ast::Try { body, handler } => {
                let mut parked = None;
                let result = self.eval(body, input, env, &mut |value| park(&mut parked, out(value)));
                match (settle(result, parked)?, handler) {
                    (Some(error), Some(handler)) => self.eval(handler, &error.value(), env, out),
                    _ => Ok(()),
                }
            }
            Ast::Reduce {
                source,
                pattern,
                init,
                update,
            } => self.eval(init, input, env, &mut |start| {
                let mut acc = Some(start);
                self.eval(source, input, env, &mut |item| {
                    self.bind_pattern(pattern, item, env, &mut |inner: Env<'_>| {
                        let current = acc.take().unwrap_or(Value::Null);
                        let mut last = None;
                        self.eval(update, &current, inner, &mut |next| {
                            last = Some(next);
                            Ok(())
                        })?;
                        acc = last;
                        Ok(())
                    })
                })?;
                out(acc.take().unwrap_or(Value::Null))
            }),
            Ast::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => self.eval(init, input, env, &mut |start| {
                let mut state = start;
                self.eval(source, input, env, &mut |item| {
                    self.bind_pattern(pattern, item, env, &mut |inner: Env<'_>| {
                        let current = state.clone();
                        self.eval(update, &current, inner, &mut |next| {
                            state = next.clone();
                            match extract {
                                Some(extract) => self.eval(extract, &next, inner, &mut *out),
                                None => out(next),
                            }
                        })
                    })
                })
            }),
            Ast::Bind {
                source,
                pattern,
                body,
            } => self.eval(source, input, env, &mut |value| {
                self.bind_pattern(pattern, value, env, &mut |inner: Env<'_>| {
                    self.eval(body, input, inner, &mut *out)
                })
            }),
            Ast::Def { def, rest } => {
                let node = env.with(Frame::Def(def));
                self.eval(rest, input, node.env(), out)
            }
            Ast::Label { name, body } => {
                let id = self.fresh_label();
                let node = env.with(Frame::Label { name, id });
                caught(self.eval(body, input, node.env(), out), id)
            }
            Ast::Break(name) => Err(self.break_to(name, env)),
            Ast::CallLocal { name, args } => match env.function(name, args.len()) {
                Some(Callee::Closure { body, env: captured }) => self.eval(body, input, captured, out),
                Some(Callee::Def { def, scope }) => {
                    self.bind_params(&def.params, args, input, env, scope, &mut |inner: Env<'_>| {
                        self.eval(&def.body, input, inner, &mut *out)
                    })
                }
                None => Err(undefined_function(name, args.len()).into()),
            },
            Ast::CallPrelude { index, args } => {
                let def = self.prelude_def(*index)?;
                self.bind_params(&def.params, args, input, env, Env::empty(), &mut |inner: Env<'_>| {
                    self.eval(&def.body, input, inner, &mut *out)
                })
            }
            Ast::Call(call) => builtins::call(self, call, input, env, out),
        }
    }

    /// Path-mode evaluation: each output is the path it was reached by, plus
    /// the value at that path. `current` is the value at `path`.
    pub(crate) fn paths<'a>(
        &self,
        ast: &'a Ast,
        path: &[Value],
        current: &Value,
        env: Env<'a>,
        out: &mut PathSink<'_>,
    ) -> Flow {
        self.enter()?;
        match ast {
            Ast::Identity => out(path.to_vec(), current.clone()),
            Ast::RecurseAll => self.recurse_paths(path, current, out),
            Ast::Index { target, index } => self.eval(index, current, env, &mut |key| {
                self.paths(target, path, current, env, &mut |mut at, container| {
                    let found = value::index(&container, &key)?;
                    at.push(key.clone());
                    out(at, found)
                })
            }),
            Ast::Slice { target, from, to } => {
                self.bounds(from.as_deref(), to.as_deref(), current, env, &mut |from, to| {
                    self.paths(target, path, current, env, &mut |mut at, container| {
                        let found = value::slice(&container, from.as_ref(), to.as_ref())?;
                        at.push(json!({
                            "start": from.clone().unwrap_or(Value::Null),
                            "end": to.clone().unwrap_or(Value::Null),
                        }));
                        out(at, found)
                    })
                })
            }
            Ast::Iterate(target) => self.paths(target, path, current, env, &mut |at, container| {
                match container {
                    Value::Array(items) => {
                        for (i, item) in items.into_iter().enumerate() {
                            let mut next = at.clone();
                            next.push(Value::from(i));
                            out(next, item)?;
                        }
                        Ok(())
                    }
                    Value::Object(map) => {
                        for (key, item) in map {
                            let mut next = at.clone();
                            next.push(Value::String(key));
                            out(next, item)?;
                        }
                        Ok(())
                    }
                    other => Err(value::cannot_iterate(&other).into()),
                }
            }),
            Ast::Pipe(lhs, rhs) => self.paths(lhs, path, current, env, &mut |at, value| {
                self.paths(rhs, &at, &value, env, &mut *out)
            }),
            Ast::Comma(lhs, rhs) => {
                self.paths(lhs, path, current, env, &mut *out)?;
                self.paths(rhs, path, current, env, out)
            }
            Ast::If { branches, otherwise } => {
                self.branch_paths(branches, otherwise.as_deref(), path, current, env, out)
            }
            Ast::Alternative(lhs, rhs) => {
                let mut any = false;
                let mut parked = None;
                let result = self.paths(lhs, path, current, env, &mut |at, value| {
                    if !truthy(&value) {
                        return Ok(());
                    }
                    any = true;
                    park(&mut parked, out(at, value))
                });
                settle(result, parked)?;
                if any {
                    Ok(())
                } else {
                    self.paths(rhs, path, current, env, out)
                }
            }
            Ast::Try { body, handler } => {
                let mut parked = None;
                let result = self.paths(body, path, current, env, &mut |at, value| {
                    park(&mut parked, out(at, value))
                });
                match (settle(result, parked)?, handler) {
                    (Some(error), Some(handler)) => {
                        self.eval(handler, &error.value(), env, &mut |value| {
                            Err(invalid_path(&value).into())
                        })
                    }
                    _ => Ok(()),
                }
            }
            Ast::Reduce {
                source,
                pattern,
                init,
                update,
            } => self.paths(init, path, current, env, &mut |start_path, start| {
                let mut acc = Some((start_path, start));
                self.eval(source, current, env, &mut |item| {
                    self.bind_pattern(pattern, item, env, &mut |inner: Env<'_>| {
                        let (at, value) = acc.take().unwrap_or((Vec::new(), Value::Null));
                        let mut last = None;
                        self.paths(update, &at, &value, inner, &mut |next_path, next| {
                            last = Some((next_path, next));
                            Ok(())
                        })?;
                        acc = last;
                        Ok(())
                    })
                })?;
                let (at, value) = acc.take().unwrap_or((Vec::new(), Value::Null));
                out(at, value)
            }),
            Ast::Foreach {
                source,
                pattern,
                init,
                update,
                extract,
            } => self.paths(init, path, current, env, &mut |start_path, start| {
                let mut state = (start_path, start);
                self.eval(source, current, env, &mut |item| {
                    self.bind_pattern(pattern, item, env, &mut |inner: Env<'_>| {
                        let (at, value) = state.clone();
                        self.paths(update, &at, &value, inner, &mut |next_path, next| {
                            state = (next_path.clone(), next.clone());
                            match extract {
                                Some(extract) => {
                                    self.paths(extract, &next_path, &next, inner, &mut *out)
                                }
                                None => out(next_path, next),
                            }
                        })
                    })
                })
            }),
            Ast::Bind {
                source,
                pattern,
                body,
            } => self.eval(source, current, env, &mut |value| {
                self.bind_pattern(pattern, value, env, &mut |inner: Env<'_>| {
                    self.paths(body, path, current, inner, &mut *out)
                })
            }),
            Ast::Def { def, rest } => {
                let node = env.with(Frame::Def(def));
                self.paths(rest, path, current, node.env(), out)
            }
            Ast::Label { name, body } => {
                let id = self.fresh_label();
                let node = env.with(Frame::Label { name, id });
                caught(self.paths(body, path, current, node.env(), out), id)
            }
            Ast::Break(name) => Err(self.break_to(name, env)),
            Ast::CallLocal { name, args } => match env.function(name, args.len()) {
                Some(Callee::Closure { body, env: captured }) => {
                    self.paths(body, path, current, captured, out)
                }
                Some(Callee::Def { def, scope }) => {
                    self.bind_params(&def.params, args, current, env, scope, &mut |inner: Env<'_>| {
                        self.paths(&def.body, path, current, inner, &mut *out)
                    })
                }
                None => Err(undefined_function(name, args.len()).into()),
            },
            Ast::CallPrelude { index, args } => {
                let def = self.prelude_def(*index)?;
                self.bind_params(&def.params, args, current, env, Env::empty(), &mut |inner: Env<'_>| {
                    self.paths(&def.body, path, current, inner, &mut *out)
                })
            }
            Ast::Call(call) if builtins::has_paths(call.builtin) => {
                builtins::call_paths(self, call, path, current, env, out)
            }
            other => self.eval(other, current, env, &mut |value| Err(invalid_path(&value).into())),
        }
    }

    pub(crate) fn collect_paths<'a>(&self, ast: &'a Ast, input: &Value, env: Env<'a>) -> Result<Vec<Vec<Value>>, Unwind> {
        let mut found = Vec::new();
        self.paths(ast, &[], input, env, &mut |at, _| {
            found.push(at);
            Ok(())
        })?;
        Ok(found)
    }

    /// Replace the value at each path with `f` of it; `None` deletes the path.
    /// Deletions happen last so earlier ones cannot shift later paths.
    pub(crate) fn update_paths(
        &self,
        mut root: Value,
        targets: &[Vec<Value>],
        f: &mut dyn FnMut(Value) -> Result<Option<Value>, Unwind>,
    ) -> Result<Value, Unwind> {
        let mut doomed = Vec::new();
        for target in targets {
            self.tick()?;
            let current = paths::get(&root, target)?;
            match f(current)? {
                Some(next) => root = paths::set(root, target, next)?,
                None => doomed.push(target.clone()),
            }
        }
        Ok(paths::delete_all(root, doomed)?)
    }

    fn assign<'a>(
        &self,
        op: AssignOp,
        lhs: &'a Ast,
        rhs: &'a Ast,
        input: &Value,
        env: Env<'a>,
        out: &mut Sink<'_>,
    ) -> Flow {
        match op {
            AssignOp::Update => {
                let targets = self.collect_paths(lhs, input, env)?;
                let updated = self.update_paths(input.clone(), &targets, &mut |current| {
                    self.first_output(rhs, &current, env)
                })?;
                out(updated)
            }
            AssignOp::Set => self.eval(rhs, input, env, &mut |value| {
                let targets = self.collect_paths(lhs, input, env)?;
                let mut root = input.clone();
                for target in &targets {
                    root = paths::set(root, target, value.clone())?;
                }
                out(root)
            }),
            AssignOp::Arith(bin) => self.eval(rhs, input, env, &mut |operand| {
                let targets = self.collect_paths(lhs, input, env)?;
                let updated = self.update_paths(input.clone(), &targets, &mut |current| {
                    Ok(Some(apply_binary(bin, &current, &operand)?))
                })?;
                out(updated)
            }),
            AssignOp::Alt => self.eval(rhs, input, env, &mut |fallback| {
                let targets = self.collect_paths(lhs, input, env)?;
                let updated = self.update_paths(input.clone(), &targets, &mut |current| {
                    Ok(Some(if truthy(&current) {
                        current
                    } else {
                        fallback.clone()
                    }))
                })?;
                out(updated)
            }),
        }
    }

    fn prelude_def(&self, index: usize) -> Result<&'static FuncDef, EvalError> {
        self.prelude
            .get(index)
            .ok_or_else(|| EvalError::type_error("prelude definition is missing"))
    }

    fn break_to(&self, name: &str, env: Env<'_>) -> Unwind {
        match env.label(name) {
            Some(id) => Unwind::Break(id),
            None => EvalError::type_error(format!("$*label-{name} is not defined")).into(),
        }
    }

    /// Bind each parameter to its argument, then continue in the function's
    /// scope. A `$name` parameter binds once per output of its argument.
    fn bind_params<'a>(
        &self,
        params: &'a [Param],
        args: &'a [Ast],
        input: &Value,
        caller: Env<'a>,
        scope: Env<'a>,
        k: &mut Scoped<'_>,
    ) -> Flow {
        let (Some((param, params)), Some((arg, args))) = (params.split_first(), args.split_first())
        else {
            return k(scope);
        };
        let closure = scope.with(Frame::Closure {
            name: &param.name,
            body: arg,
            env: caller,
        });
        if !param.is_var {
            return self.bind_params(params, args, input, caller, closure.env(), k);
        }
        self.eval(arg, input, caller, &mut |value| {
            let var = closure.env().with(Frame::Var {
                name: &param.name,
                value,
            });
            self.bind_params(params, args, input, caller, var.env(), &mut *k)
        })
    }

    pub(crate) fn bind_pattern<'a>(
        &self,
        pattern: &'a Pattern,
        value: Value,
        env: Env<'a>,
        k: &mut Scoped<'_>,
    ) -> Flow {
        match pattern {
            Pattern::Var(name) => {
                let node = env.with(Frame::Var { name, value });
                k(node.env())
            }
            Pattern::Array(items) => match &value {
                Value::Array(_) | Value::Null => self.bind_items(items, 0, &value, env, k),
                other => Err(EvalError::type_error(format!(
                    "Cannot index {} with number",
                    type_name(other)
                ))
                .into()),
            },
            Pattern::Object(entries) => self.bind_entries(entries, &value, env, k),
        }
    }

    fn bind_items<'a>(
        &self,
        items: &'a [Pattern],
        at: usize,
        source: &Value,
        env: Env<'a>,
        k: &mut Scoped<'_>,
    ) -> Flow {
        let Some((first, rest)) = items.split_first() else {
            return k(env);
        };
        let element = value::index(source, &Value::from(at))?;
        self.bind_pattern(first, element, env, &mut |inner: Env<'_>| {
            self.bind_items(rest, at + 1, source, inner, &mut *k)
        })
    }

    fn bind_entries<'a>(
        &self,
        entries: &'a [(PatternKey, Option<Pattern>)],
        source: &Value,
        env: Env<'a>,
        k: &mut Scoped<'_>,
    ) -> Flow {
        let Some(((key, sub), rest)) = entries.split_first() else {
            return k(env);
        };
        match key {
            PatternKey::Var(name) => {
                let field = value::index(source, &Value::String(name.clone()))?;
                let node = env.with(Frame::Var {
                    name,
                    value: field.clone(),
                });
                match sub {
                    Some(sub) => self.bind_pattern(sub, field, node.env(), &mut |inner: Env<'_>| {
                        self.bind_entries(rest, source, inner, &mut *k)
                    }),
                    None => self.bind_entries(rest, source, node.env(), k),
                }
            }
            PatternKey::Expr(expr) => self.eval(expr, source, env, &mut |name| {
                if !name.is_string() {
                    return Err(EvalError::type_error(format!(
                        "Cannot index {} with {}",
                        type_name(source),
                        type_name(&name)
                    ))
                    .into());
                }
                let field = value::index(source, &name)?;
                match sub {
                    Some(sub) => self.bind_pattern(sub, field, env, &mut |inner: Env<'_>| {
                        self.bind_entries(rest, source, inner, &mut *k)
                    }),
                    None => self.bind_entries(rest, source, env, &mut *k),
                }
            }),
        }
    }

    /// Evaluate optional slice bounds, `to` varying slowest.
    fn bounds<'a>(
        &self,
        from: Option<&'a Ast>,
        to: Option<&'a Ast>,
        input: &Value,
        env: Env<'a>,
        k: &mut dyn FnMut(Option<Value>, Option<Value>) -> Flow,
    ) -> Flow {
        self.optional(to, input, env, &mut |to| {
            self.optional(from, input, env, &mut |from| k(from, to.clone()))
        })
    }

    fn optional<'a>(
        &self,
        ast: Option<&'a Ast>,
        input: &Value,
        env: Env<'a>,
        k: &mut dyn FnMut(Option<Value>) -> Flow,
    ) -> Flow {
        match ast {
            None => k(None),
            Some(ast) => self.eval(ast, input, env, &mut |value| k(Some(value))),
        }
    }

    /// Segments are combined right to left so the leftmost interpolation
    /// varies fastest.
    fn interpolate<'a>(
        &self,
        parts: &'a [StrSegment],
        format: Option<&str>,
        input: &Value,
        env: Env<'a>,
        suffix: String,
        out: &mut Sink<'_>,
    ) -> Flow {
        let Some((last, rest)) = parts.split_last() else {
            return out(Value::String(suffix));
        };
        match last {
            StrSegment::Lit(text) => {
                self.interpolate(rest, format, input, env, format!("{text}{suffix}"), out)
            }
            StrSegment::Interp(expr) => self.eval(expr, input, env, &mut |value| {
                let piece = match format {
                    Some(name) => format::apply(name, &value)?,
                    None => value::to_text(&value),
                };
                self.interpolate(rest, format, input, env, format!("{piece}{suffix}"), &mut *out)
            }),
        }
    }

    fn object<'a>(
        &self,
        entries: &'a [(ObjectKey, Ast)],
        input: &Value,
        env: Env<'a>,
        partial: Map<String, Value>,
        out: &mut Sink<'_>,
    ) -> Flow {
        let Some(((key, value_expr), rest)) = entries.split_first() else {
            return out(Value::Object(partial));
        };
        match key {
            ObjectKey::Name(name) => self.eval(value_expr, input, env, &mut |value| {
                let mut next = partial.clone();
                next.insert(name.clone(), value);
                self.object(rest, input, env, next, &mut *out)
            }),
            ObjectKey::Expr(key_expr) => self.eval(key_expr, input, env, &mut |key| {
                let Value::String(key) = key else {
                    return Err(EvalError::type_error(format!(
                        "Object keys must be strings, not {}",
                        type_name(&key)
                    ))
                    .into());
                };
                self.eval(value_expr, input, env, &mut |value| {
                    let mut next = partial.clone();
                    next.insert(key.clone(), value);
                    self.object(rest, input, env, next, &mut *out)
                })
            }),
        }
    }

    fn branch<'a>(
        &self,
        branches: &'a [(Ast, Ast)],
        otherwise: Option<&'a Ast>,
        input: &Value,
        env: Env<'a>,
        out: &mut Sink<'_>,
    ) -> Flow {
        let Some(((cond, body), rest)) = branches.split_first() else {
            return match otherwise {
                Some(otherwise) => self.eval(otherwise, input, env, out),
                None => out(input.clone()),
            };
        };
        self.eval(cond, input, env, &mut |test| {
            if truthy(&test) {
                self.eval(body, input, env, &mut *out)
            } else {
                self.branch(rest, otherwise, input, env, &mut *out)
            }
        })
    }

    fn branch_paths<'a>(
        &self,
        branches: &'a [(Ast, Ast)],
        otherwise: Option<&'a Ast>,
        path: &[Value],
        current: &Value,
        env: Env<'a>,
        out: &mut PathSink<'_>,
    ) -> Flow {
        let Some(((cond, body), rest)) = branches.split_first() else {
            return match otherwise {
                Some(otherwise) => self.paths(otherwise, path, current, env, out),
                None => out(path.to_vec(), current.clone()),
            };
        };
        self.eval(cond, current, env, &mut |test| {
            if truthy(&test) {
                self.paths(body, path, current, env, &mut *out)
            } else {
                self.branch_paths(rest, otherwise, path, current, env, &mut *out)
            }
        })
    }

    /// `..`: every value in pre-order, the input first.
    pub(crate) fn recurse_all(&self, input: &Value, out: &mut Sink<'_>) -> Flow {
        let mut pending = vec![input.clone()];
        while let Some(value) = pending.pop() {
            self.tick()?;
            let children: Vec<Value> = match &value {
                Value::Array(items) => items.iter().rev().cloned().collect(),
                Value::Object(map) => map.values().rev().cloned().collect(),
                _ => Vec::new(),
            };
            out(value)?;
            pending.extend(children);
        }
        Ok(())
    }

    pub(crate) fn recurse_paths(&self, path: &[Value], current: &Value, out: &mut PathSink<'_>) -> Flow {
        let mut pending = vec![(path.to_vec(), current.clone())];
        while let Some((at, value)) = pending.pop() {
            self.tick()?;
            let mut children = Vec::new();
            match &value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate().rev() {
                        let mut next = at.clone();
                        next.push(Value::from(i));
                        children.push((next, item.clone()));
                    }
                }
                Value::Object(map) => {
                    for (key, item) in map.iter().rev() {
                        let mut next = at.clone();
                        next.push(Value::String(key.clone()));
                        children.push((next, item.clone()));
                    }
                }
                _ => {}
            }
            out(at, value)?;
            pending.extend(children);
        }
        Ok(())
    }
}

fn undefined_function(name: &str, arity: usize) -> EvalError {
    EvalError::type_error(format!("{name}/{arity} is not defined"))
}
