//! # Demo Guests
//!
//! Small guest programs that exercise the kernel end to end. All of them run
//! as nested processes and reach the kernel only through their tunnel.

use kernel_api::{KernelError, KernelResult, ProcAttr};
use sim_kernel::{dial_address, listen_address, GuestContext, StaticResolver, Syscalls, TaskHost};
use std::future::Future;
use std::time::Duration;
use virtual_net::AckedConn;

/// Address the demo servers bind
pub const DEMO_ADDRESS: &str = "127.0.0.1:7000";

/// Pings sent by `ping-client` when no count is given
pub const DEFAULT_PINGS: usize = 3;

const DIAL_ATTEMPTS: usize = 50;
const DIAL_BACKOFF: Duration = Duration::from_millis(10);

/// Registers every demo program on `host` and returns the resolver for them
pub fn install(host: &TaskHost, resolver: StaticResolver) -> StaticResolver {
    let resolver = register(host, resolver, "echo-server", echo_server);
    let resolver = register(host, resolver, "echo-client", echo_client);
    let resolver = register(host, resolver, "ping-server", ping_server);
    let resolver = register(host, resolver, "ping-client", ping_client);
    register(host, resolver, "ping-worker", ping_worker)
}

fn register<F, Fut>(
    host: &TaskHost,
    resolver: StaticResolver,
    name: &str,
    program: F,
) -> StaticResolver
where
    F: Fn(GuestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = KernelResult<()>> + Send + 'static,
{
    let location = format!("mem://demos/{name}");
    host.register(location.clone(), program);
    resolver.with_program(name, location)
}

/// Answers each connection's first line, then hangs up
async fn echo_server(ctx: GuestContext) -> KernelResult<()> {
    let listener = listen_address(&*ctx.kernel, "tcp", DEMO_ADDRESS).await?;
    ctx.println(&format!("listening on {}", listener.addr())).await?;

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(KernelError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        };
        if let Some(line) = read_line(&conn).await? {
            conn.write(format!("{line}\n").as_bytes()).await?;
        }
        conn.close()?;
    }
}

/// Sends one line to the echo server and prints what comes back
async fn echo_client(ctx: GuestContext) -> KernelResult<()> {
    let message = if ctx.args.is_empty() {
        "Hello World".to_string()
    } else {
        ctx.args.join(" ")
    };

    let conn = dial_retrying(&ctx, DEMO_ADDRESS).await?;
    conn.write(format!("{message}\n").as_bytes()).await?;
    while let Some(line) = read_line(&conn).await? {
        ctx.println(&line).await?;
    }
    conn.close()
}

/// Replies `pong` to every `ping` line until the client hangs up
async fn ping_server(ctx: GuestContext) -> KernelResult<()> {
    let listener = listen_address(&*ctx.kernel, "tcp", DEMO_ADDRESS).await?;
    if ctx.env_var("TEST").is_some() {
        ctx.eprintln("test mode").await?;
    }

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(KernelError::Closed) => return Ok(()),
            Err(err) => return Err(err),
        };
        while let Some(line) = read_line(&conn).await? {
            let reply = match line.strip_prefix("ping") {
                Some(rest) => format!("pong{rest}\n"),
                None => format!("error: unknown request {line:?}\n"),
            };
            conn.write(reply.as_bytes()).await?;
        }
        conn.close()?;
    }
}

async fn ping_client(ctx: GuestContext) -> KernelResult<()> {
    let rounds = match ctx.args.first() {
        Some(raw) => raw
            .parse()
            .map_err(|_| KernelError::invalid(format!("invalid ping count {raw:?}")))?,
        None => DEFAULT_PINGS,
    };

    let conn = dial_retrying(&ctx, DEMO_ADDRESS).await?;
    for round in 0..rounds {
        let request = format!("ping {round}: Hello World");
        conn.write(format!("{request}\n").as_bytes()).await?;
        let result = read_line(&conn).await?.ok_or(KernelError::Closed)?;
        ctx.println(&format!("request={request:?} result={result:?}"))
            .await?;
    }
    conn.close()
}

/// Starts a ping server and client, then stops the server once the client ends
async fn ping_worker(ctx: GuestContext) -> KernelResult<()> {
    let attr = ProcAttr::new()
        .with_files(vec![ctx.stdin, ctx.stdout, ctx.stderr])
        .with_env("TEST=1");
    let client = ctx
        .kernel
        .start_process("ping-client", ctx.args.clone(), attr.clone())
        .await?;
    let server = ctx
        .kernel
        .start_process("ping-server", Vec::new(), attr)
        .await?;

    let client_status = ctx.kernel.wait(client).await?;
    ctx.kernel.close(server).await?;
    let server_status = ctx.kernel.wait(server).await?;

    ctx.println(&format!("client {client_status}, server {server_status}"))
        .await
}

/// Dials `address`, retrying while nothing listens there yet
async fn dial_retrying(ctx: &GuestContext, address: &str) -> KernelResult<AckedConn> {
    let mut attempt = 1;
    loop {
        match dial_address(&*ctx.kernel, "tcp", address).await {
            Err(KernelError::Unavailable(port)) if attempt < DIAL_ATTEMPTS => {
                tracing::debug!(%port, attempt, "server not up yet");
                attempt += 1;
                tokio::time::sleep(DIAL_BACKOFF).await;
            }
            other => return other,
        }
    }
}

/// Reads one `\n`-terminated line; `None` at end of stream
///
/// Reads a byte at a time so nothing past the newline is consumed.
async fn read_line(conn: &AckedConn) -> KernelResult<Option<String>> {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if conn.read(&mut byte).await? == 0 {
            if line.is_empty() {
                return Ok(None);
            }
            break;
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}
