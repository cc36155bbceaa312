// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::plugstack::Plugin;
use serde_json::json;
use yare::parameterized;

fn node_fixture() -> Value {
    json!({
        "id": 1,
        "resources": {"cores": "0-3", "gpus": "0", "ncores": 4},
        "hostname": "node1",
    })
}

fn ctx<'a>(node: &'a Value) -> RenderContext<'a> {
    RenderContext {
        jobid: Jobid(0x1234000000000000),
        name: "myjob",
        nnodes: 2,
        ntasks: 8,
        task: Some(TaskTags { rank: 5, index: 1 }),
        node,
    }
}

#[parameterized(
    id_default_is_f58 = { "{{id}}", "\u{0192}43bQEngqbnw" },
    id_f58 = { "{{id.f58}}", "\u{0192}43bQEngqbnw" },
    id_dec = { "{{id.dec}}", "1311673391471656960" },
    id_hex = { "{{id.hex}}", "0x1234000000000000" },
    id_dothex = { "{{id.dothex}}", "1234.0000.0000.0000" },
    id_kvs = { "{{id.kvs}}", "job.1234.0000.0000.0000" },
    jobid_synonym = { "{{jobid.dec}}", "1311673391471656960" },
    name = { "{{name}}", "myjob" },
    nnodes = { "{{nnodes}}", "2" },
    ntasks = { "{{ntasks}}", "8" },
    size = { "{{size}}", "8" },
    task_id = { "{{task.id}}", "5" },
    taskid = { "{{taskid}}", "5" },
    task_rank = { "{{task.rank}}", "5" },
    task_index = { "{{task.index}}", "1" },
    task_localid = { "{{task.localid}}", "1" },
    node_cores = { "{{node.cores}}", "0-3" },
    node_gpus = { "{{node.gpus}}", "0" },
    node_ncores = { "{{node.ncores}}", "4" },
    node_dotted = { "{{node.hostname}}", "node1" },
)]
fn builtin_tags(template: &str, expected: &str) {
    let node = node_fixture();
    assert_eq!(render(template, &ctx(&node), None).unwrap(), expected);
}

#[test]
fn renders_inside_larger_strings() {
    let node = node_fixture();
    let out = render("out-{{id.dec}}-task{{task.id}}.log", &ctx(&node), None).unwrap();
    assert_eq!(out, "out-1311673391471656960-task5.log");
}

#[test]
fn unknown_tag_fails_the_render() {
    let node = node_fixture();
    assert_eq!(render("keep {{bogus}} going", &ctx(&node), None), Err(Errnum::Noent));
}

#[test]
fn diagnosis_covers_every_tag_before_failing() {
    // the scan keeps going past a bad tag so later tags are still
    // checked; the overall result is still Noent
    let node = node_fixture();
    assert_eq!(render("{{bogus}} {{also.bogus}}", &ctx(&node), None), Err(Errnum::Noent));
}

#[test]
fn unterminated_tag_is_verbatim_not_an_error() {
    let node = node_fixture();
    assert_eq!(render("text {{unclosed", &ctx(&node), None).unwrap(), "text {{unclosed");
}

#[test]
fn task_tags_without_task_context_are_unknown() {
    let node = node_fixture();
    let mut c = ctx(&node);
    c.task = None;
    assert_eq!(render("{{task.id}}", &c, None), Err(Errnum::Noent));
}

#[test]
fn missing_node_key_is_unknown() {
    let node = node_fixture();
    assert_eq!(render("{{node.nvme}}", &ctx(&node), None), Err(Errnum::Noent));
}

struct TmpdirPlugin;

impl Plugin for TmpdirPlugin {
    fn call(&mut self, topic: &str, args: &mut Map<String, Value>) -> Option<i32> {
        if topic != "mustache.render.tmpdir" {
            return None;
        }
        args.insert("result".to_string(), json!("/tmp/job"));
        Some(0)
    }
}

#[test]
fn plugin_renders_custom_tag() {
    let node = node_fixture();
    let mut stack = Plugstack::new();
    stack.push("tmpdir", Box::new(TmpdirPlugin));
    let out = render("dir={{tmpdir}}", &ctx(&node), Some(&mut stack)).unwrap();
    assert_eq!(out, "dir=/tmp/job");
}

#[test]
fn plugin_without_result_is_unknown() {
    struct NoResult;
    impl Plugin for NoResult {
        fn call(&mut self, _topic: &str, _args: &mut Map<String, Value>) -> Option<i32> {
            Some(0)
        }
    }
    let node = node_fixture();
    let mut stack = Plugstack::new();
    stack.push("noresult", Box::new(NoResult));
    assert_eq!(render("{{mystery}}", &ctx(&node), Some(&mut stack)), Err(Errnum::Noent));
}
