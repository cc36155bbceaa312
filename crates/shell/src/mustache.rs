// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `{{tag}}` rendering inside argv elements and paths.
//!
//! Built-in tags cover the jobid in all its forms, job name and sizes,
//! per-task ranks and the per-node resource object. Anything else is
//! offered to plugins as a `mustache.render.<tag>` topic. A tag nobody
//! renders gets a diagnostic and does not abort the scan, but the render
//! as a whole fails with `Noent` so callers never use a command line
//! with literal braces left in it.

use crate::plugstack::Plugstack;
use flux_core::{jpath, Errnum, Jobid, JobidForm};
use serde_json::{json, Map, Value};
use tracing::warn;

/// Everything a template may refer to.
pub struct RenderContext<'a> {
    pub jobid: Jobid,
    pub name: &'a str,
    pub nnodes: usize,
    pub ntasks: u64,
    /// Set when rendering inside a task (task.* tags).
    pub task: Option<TaskTags>,
    /// The rank-info object backing `node.*` tags.
    pub node: &'a Value,
}

#[derive(Debug, Clone, Copy)]
pub struct TaskTags {
    /// Global task rank.
    pub rank: u32,
    /// Local task index on this shell.
    pub index: u32,
}

/// Render every `{{tag}}` occurrence in `template`. An unrenderable tag
/// is diagnosed and the scan continues, but the result is `Noent`.
pub fn render(
    template: &str,
    ctx: &RenderContext<'_>,
    plugins: Option<&mut Plugstack>,
) -> Result<String, Errnum> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    let mut plugins = plugins;
    let mut missing = false;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let tag = &after[..end];
                match render_tag(tag, ctx, plugins.as_deref_mut()) {
                    Some(value) => out.push_str(&value),
                    None => {
                        warn!(tag, "unknown mustache tag");
                        missing = true;
                        out.push_str(&rest[start..start + 2 + end + 2]);
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // unterminated: not a tag, emit the remainder verbatim
                out.push_str(&rest[start..]);
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    if missing {
        return Err(Errnum::Noent);
    }
    Ok(out)
}

fn render_tag(tag: &str, ctx: &RenderContext<'_>, plugins: Option<&mut Plugstack>) -> Option<String> {
    let tag = tag.trim();
    if let Some(form) = tag
        .strip_prefix("id")
        .or_else(|| tag.strip_prefix("jobid"))
        .filter(|rest| rest.is_empty() || rest.starts_with('.'))
    {
        let form = form.strip_prefix('.').unwrap_or("f58");
        return match form.parse::<JobidForm>() {
            Ok(form) => Some(ctx.jobid.encode(form)),
            Err(_) => None,
        };
    }
    match tag {
        "name" => return Some(ctx.name.to_string()),
        "nnodes" => return Some(ctx.nnodes.to_string()),
        "ntasks" | "size" => return Some(ctx.ntasks.to_string()),
        "taskid" | "task.id" | "task.rank" => {
            return ctx.task.map(|t| t.rank.to_string());
        }
        "task.index" | "task.localid" => {
            return ctx.task.map(|t| t.index.to_string());
        }
        _ => {}
    }
    if let Some(path) = tag.strip_prefix("node.") {
        // shorthands live under the resources object
        let path = match path {
            "cores" => "resources.cores".to_string(),
            "gpus" => "resources.gpus".to_string(),
            "ncores" => "resources.ncores".to_string(),
            other => other.to_string(),
        };
        return match jpath::get(ctx.node, &path) {
            Ok(Value::String(s)) => Some(s.clone()),
            Ok(value) => Some(value.to_string()),
            Err(_) => None,
        };
    }
    // not built in: offer the tag to plugins
    if let Some(stack) = plugins {
        let mut args = Map::new();
        args.insert("tag".to_string(), json!(tag));
        if stack.call_checked(&format!("mustache.render.{tag}"), &mut args) == Some(0) {
            if let Some(result) = args.get("result").and_then(Value::as_str) {
                return Some(result.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "mustache_tests.rs"]
mod tests;
