// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use flux_core::ioencode;
use flux_wire::{Cred, Router, Rpc, RpcFlags};
use std::io::{Read, Write};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::time::Duration;

#[derive(Default)]
struct FakeInner {
    subs: HashMap<String, Vec<mpsc::UnboundedSender<UnitProperties>>>,
    fds: HashMap<String, SdexecFds>,
    calls: Vec<String>,
    fail_start: bool,
}

/// Simulated sdbus endpoint. Tests drive unit transitions explicitly.
#[derive(Default)]
struct FakeSdBus {
    inner: Mutex<FakeInner>,
}

impl FakeSdBus {
    fn emit(&self, unit: &str, active: &str, sub: &str, pid: Option<i32>, status: Option<i32>) {
        self.emit_props(
            unit,
            UnitProperties {
                active_state: active.to_string(),
                sub_state: sub.to_string(),
                exec_main_pid: pid,
                exec_main_status: status,
                result: None,
            },
        );
    }

    fn emit_props(&self, unit: &str, props: UnitProperties) {
        let inner = self.inner.lock();
        if let Some(subs) = inner.subs.get(unit) {
            for tx in subs {
                let _ = tx.send(props.clone());
            }
        }
    }

    fn calls(&self) -> Vec<String> {
        self.inner.lock().calls.clone()
    }

    /// Child-side stdout stream of the unit.
    fn stdout(&self, unit: &str) -> StdUnixStream {
        let mut inner = self.inner.lock();
        let fds = inner.fds.get_mut(unit).expect("unit fds");
        let fd = fds.stdout.try_clone().expect("clone stdout fd");
        StdUnixStream::from(fd)
    }

    fn stdin(&self, unit: &str) -> StdUnixStream {
        let mut inner = self.inner.lock();
        let fds = inner.fds.get_mut(unit).expect("unit fds");
        let fd = fds.stdin.try_clone().expect("clone stdin fd");
        StdUnixStream::from(fd)
    }

    /// Drop the unit's fds so channel EOF propagates.
    fn close_fds(&self, unit: &str) {
        self.inner.lock().fds.remove(unit);
    }
}

#[async_trait]
impl SdBus for FakeSdBus {
    async fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        _cmd: &Cmd,
        fds: SdexecFds,
    ) -> Result<(), String> {
        let mut inner = self.inner.lock();
        inner.calls.push(format!("StartTransientUnit({name},{mode})"));
        if inner.fail_start {
            return Err("start refused".to_string());
        }
        inner.fds.insert(name.to_string(), fds);
        Ok(())
    }

    async fn stop_unit(&self, name: &str, mode: &str) -> Result<(), String> {
        self.inner.lock().calls.push(format!("StopUnit({name},{mode})"));
        Ok(())
    }

    async fn kill_unit(&self, name: &str, who: &str, signum: i32) -> Result<(), String> {
        self.inner.lock().calls.push(format!("KillUnit({name},{who},{signum})"));
        Ok(())
    }

    async fn reset_failed_unit(&self, name: &str) -> Result<(), String> {
        self.inner.lock().calls.push(format!("ResetFailedUnit({name})"));
        Ok(())
    }

    fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<UnitProperties> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().subs.entry(name.to_string()).or_default().push(tx);
        rx
    }
}

struct Fixture {
    bus: Arc<FakeSdBus>,
    client: Handle,
}

fn setup() -> Fixture {
    let router = Router::new();
    let server_handle = router.handle(Cred::owner(0));
    let bus = Arc::new(FakeSdBus::default());
    SdexecServer::start(server_handle, "sdexec", 0, Arc::clone(&bus) as Arc<dyn SdBus>);
    Fixture { bus, client: router.handle(Cred::owner(0)) }
}

async fn next_timeout(rpc: &mut Rpc) -> Result<Value, flux_wire::RpcError> {
    tokio::time::timeout(Duration::from_secs(10), rpc.next())
        .await
        .expect("timed out waiting for response")
}

async fn wait_for_call(bus: &FakeSdBus, needle: &str) {
    for _ in 0..200 {
        if bus.calls().iter().any(|c| c.contains(needle)) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("bus call {needle:?} never happened; saw {:?}", bus.calls());
}

fn exec(client: &Handle, cmd: &Cmd) -> Rpc {
    client.rpc("sdexec.exec", json!({"cmd": cmd, "flags": 0}), RpcFlags::STREAMING)
}

const UNIT1: &str = "sdexec-1.service";

#[tokio::test]
async fn unit_lifecycle_start_output_finish() {
    let fx = setup();
    let mut rpc = exec(&fx.client, &Cmd::new(&["work"]));
    wait_for_call(&fx.bus, "StartTransientUnit").await;

    fx.bus.emit(UNIT1, "active", "running", Some(1234), None);
    let started = next_timeout(&mut rpc).await.unwrap();
    assert_eq!(started, json!({"type": "started", "pid": 1234}));

    let mut child_out = fx.bus.stdout(UNIT1);
    child_out.write_all(b"result\n").unwrap();
    let output = next_timeout(&mut rpc).await.unwrap();
    let io = ioencode::iodecode(output.get("io").and_then(Value::as_object).unwrap()).unwrap();
    assert_eq!(io.data.as_deref(), Some(b"result\n".as_slice()));

    fx.bus.emit(UNIT1, "active", "exited", Some(1234), Some(0));
    let finished = next_timeout(&mut rpc).await.unwrap();
    assert_eq!(finished, json!({"type": "finished", "status": 0}));
    wait_for_call(&fx.bus, "StopUnit").await;

    drop(child_out);
    fx.bus.close_fds(UNIT1);
    fx.bus.emit(UNIT1, "inactive", "dead", None, None);

    // two EOFs then terminal Nodata
    let mut eofs = 0;
    loop {
        match next_timeout(&mut rpc).await {
            Ok(v) => {
                let io =
                    ioencode::iodecode(v.get("io").and_then(Value::as_object).unwrap()).unwrap();
                if io.eof {
                    eofs += 1;
                }
            }
            Err(e) => {
                assert!(e.is_eof());
                break;
            }
        }
    }
    assert_eq!(eofs, 2);
}

#[tokio::test]
async fn exec_failure_reports_systemd_error() {
    let fx = setup();
    let mut rpc = exec(&fx.client, &Cmd::new(&["broken"]));
    wait_for_call(&fx.bus, "StartTransientUnit").await;

    fx.bus.emit_props(
        UNIT1,
        UnitProperties {
            active_state: "failed".to_string(),
            sub_state: "failed".to_string(),
            exec_main_pid: None,
            exec_main_status: None,
            result: Some("exit-code".to_string()),
        },
    );
    let err = next_timeout(&mut rpc).await.unwrap_err();
    assert_eq!(err.errnum, Errnum::Noent);
    assert!(err.text.unwrap().contains("exit-code"));
    wait_for_call(&fx.bus, "ResetFailedUnit").await;
}

#[tokio::test]
async fn start_refusal_is_an_exec_error() {
    let fx = setup();
    fx.bus.inner.lock().fail_start = true;
    let mut rpc = exec(&fx.client, &Cmd::new(&["nope"]));
    let err = next_timeout(&mut rpc).await.unwrap_err();
    assert_eq!(err.errnum, Errnum::Noent);
    assert_eq!(err.text.as_deref(), Some("start refused"));
}

#[tokio::test(start_paused = true)]
async fn stop_timer_escalates_to_kill_then_deadlock() {
    let fx = setup();
    let mut cmd = Cmd::new(&["stuck"]);
    cmd.opts.insert("SDEXEC_STOP_TIMER_SEC".to_string(), "5".to_string());
    let mut rpc = exec(&fx.client, &cmd);
    wait_for_call(&fx.bus, "StartTransientUnit").await;

    fx.bus.emit(UNIT1, "active", "running", Some(7), None);
    let started = next_timeout(&mut rpc).await.unwrap();
    assert_eq!(started.get("type").and_then(Value::as_str), Some("started"));

    fx.bus.emit(UNIT1, "deactivating", "stop-sigterm", None, None);

    // T seconds: KillUnit(main, SIGKILL)
    wait_for_call(&fx.bus, "KillUnit(sdexec-1.service,main,9)").await;

    // 2T seconds: the client is told to give up
    let err = next_timeout(&mut rpc).await.unwrap_err();
    assert_eq!(err.errnum, Errnum::Deadlk);
}

#[tokio::test]
async fn write_before_start_is_queued() {
    let fx = setup();
    let mut rpc = exec(&fx.client, &Cmd::new(&["reader"]));
    wait_for_call(&fx.bus, "StartTransientUnit").await;

    // write races the unit start
    let io = ioencode::ioencode("stdin", "0", Some(b"early\n"), false).unwrap();
    fx.client.rpc(
        "sdexec.write",
        json!({"matchtag": rpc.matchtag(), "io": io}),
        RpcFlags::NORESPONSE,
    );
    // give the write a moment to land in the driver queue
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut child_in = fx.bus.stdin(UNIT1);
    child_in.set_nonblocking(false).unwrap();
    fx.bus.emit(UNIT1, "active", "running", Some(9), None);
    let started = next_timeout(&mut rpc).await.unwrap();
    assert_eq!(started.get("type").and_then(Value::as_str), Some("started"));

    let mut buf = [0u8; 16];
    let n = child_in.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"early\n");
}

#[tokio::test]
async fn kill_rpc_uses_kill_unit() {
    let fx = setup();
    let mut rpc = exec(&fx.client, &Cmd::new(&["victim"]));
    wait_for_call(&fx.bus, "StartTransientUnit").await;
    fx.bus.emit(UNIT1, "active", "running", Some(42), None);
    next_timeout(&mut rpc).await.unwrap();

    let reply = fx
        .client
        .rpc("sdexec.kill", json!({"pid": 42, "signum": 15}), RpcFlags::default())
        .get()
        .await;
    assert!(reply.is_ok());
    wait_for_call(&fx.bus, "KillUnit(sdexec-1.service,main,15)").await;
}
