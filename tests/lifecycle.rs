/*
 * Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

//! End-to-end lifecycle tests driving [`ServerProcess`] and
//! [`TestOrchestrator`] against a stand-in process and a canned status
//! endpoint, so no real container or JDK is needed.

use idp_integration::harness::{
    ContainerKind, DistributionHome, HarnessError, PortSet, ServerConfig, ServerProcess,
    ServerState, TestContext, TestOrchestrator,
};
use std::fs;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const SENTINEL: &str = "### Operating Environment";

fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Serves one canned HTTP response per connection on a kernel-chosen port;
/// the last response repeats for every further connection.
fn spawn_responder(responses: Vec<String>) -> String {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/idp/status", listener.local_addr().unwrap());
    std::thread::spawn(move || {
        let mut index = 0usize;
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf);
            let response = &responses[index.min(responses.len() - 1)];
            let _ = stream.write_all(response.as_bytes());
            index += 1;
        }
    });
    url
}

fn ok_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

fn unavailable_response() -> String {
    "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        .to_string()
}

fn sentinel_response() -> String {
    ok_response(&format!("{SENTINEL}\nidp.version=5.1.3\n"))
}

fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

fn test_ports() -> PortSet {
    PortSet {
        http: 20080,
        https: 20443,
        backchannel: 20444,
        auxiliary: 20389,
    }
}

/// A supervised stand-in process that sleeps until killed, with the status
/// URL redirected to a canned responder.
fn stand_in_server(
    dir: &TempDir,
    test_name: &str,
    status_url: String,
    attempts: u32,
) -> ServerProcess {
    let context = Arc::new(TestContext::new(Some(test_name.to_string()), dir.path()));
    context.ensure_created().unwrap();
    let home = DistributionHome::new(
        dir.path(),
        "5.1.3",
        dir.path().join("jetty-base"),
        dir.path().join("jetty-home"),
    );
    let config = ServerConfig::builder()
        .command_override(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "sleep 300".to_string(),
        ])
        .status_url_override(status_url)
        .startup_budget(attempts, Duration::from_millis(50))
        .shutdown_budget(2, Duration::from_millis(50))
        .build();
    ServerProcess::new(
        ContainerKind::Jetty,
        home,
        test_ports(),
        String::new(),
        config,
        context,
    )
    .unwrap()
}

#[test]
fn start_blocks_until_sentinel_then_stop_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let url = spawn_responder(vec![
        unavailable_response(),
        unavailable_response(),
        sentinel_response(),
    ]);
    let mut server = stand_in_server(&dir, "HappyPath", url, 20);

    server.initialize().unwrap();
    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);
    let pid = server.pid().unwrap();
    assert!(process_alive(pid));

    server.stop().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!server.is_running());
    assert!(!process_alive(pid));
}

#[test]
fn startup_that_never_reports_ready_times_out_and_kills_the_child() {
    let dir = TempDir::new().unwrap();
    let url = spawn_responder(vec![unavailable_response()]);
    let mut server = stand_in_server(&dir, "NeverReady", url, 3);

    server.initialize().unwrap();
    let err = server.start().unwrap_err();
    match err {
        HarnessError::StartupTimeout { attempts, .. } => assert_eq!(attempts, 3),
        other => panic!("expected StartupTimeout, got {other}"),
    }
    assert!(!server.is_running());
}

#[test]
fn wrong_status_body_fails_startup_immediately() {
    let dir = TempDir::new().unwrap();
    let url = spawn_responder(vec![ok_response("<html>some other service</html>")]);
    let mut server = stand_in_server(&dir, "WrongService", url, 50);

    server.initialize().unwrap();
    let err = server.start().unwrap_err();
    match err {
        HarnessError::UnexpectedStatusBody { got, .. } => {
            assert!(got.contains("some other service"));
        }
        other => panic!("expected UnexpectedStatusBody, got {other}"),
    }
    assert!(!server.is_running());
}

#[test]
fn crashing_child_surfaces_exit_code_and_captured_output() {
    let dir = TempDir::new().unwrap();
    let url = spawn_responder(vec![unavailable_response()]);
    let context = Arc::new(TestContext::new(Some("Crasher".to_string()), dir.path()));
    context.ensure_created().unwrap();
    let home = DistributionHome::new(
        dir.path(),
        "5.1.3",
        dir.path().join("jetty-base"),
        dir.path().join("jetty-home"),
    );
    let config = ServerConfig::builder()
        .command_override(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "echo booting; echo broken >&2; exit 7".to_string(),
        ])
        .status_url_override(url)
        .startup_budget(20, Duration::from_millis(50))
        .build();
    let mut server = ServerProcess::new(
        ContainerKind::Jetty,
        home,
        test_ports(),
        String::new(),
        config,
        context,
    )
    .unwrap();

    server.initialize().unwrap();
    let err = server.start().unwrap_err();
    match err {
        HarnessError::ProcessCrashed {
            exit_code,
            stdout,
            stderr,
            ..
        } => {
            assert_eq!(exit_code, Some(7));
            assert!(stdout.contains("booting"));
            assert!(stderr.contains("broken"));
        }
        other => panic!("expected ProcessCrashed, got {other}"),
    }
}

/// Lays out a minimal distribution template plus a Jetty home under
/// `build_dir`, mirroring the unpacked build output the stager expects.
fn make_build_dir(build_dir: &Path) {
    let template = build_dir.join("idp-server-5.1.3");
    for subtree in ["conf", "credentials", "metadata", "webapp", "logs", "tmp"] {
        fs::create_dir_all(template.join(subtree)).unwrap();
    }
    fs::create_dir_all(template.join("jetty-base/logs")).unwrap();
    fs::create_dir_all(template.join("jetty-base/tmp")).unwrap();
    fs::write(
        template.join("jetty-base/start.ini"),
        "jetty.http.port=8080\njetty.ssl.port=8443\n",
    )
    .unwrap();
    fs::write(
        template.join("conf/idp.properties"),
        "idp.entityID = https://idp.example.org/idp/shibboleth\n\
         idp.baseurl = https://localhost/idp\n",
    )
    .unwrap();
    fs::write(
        template.join("conf/ldap.properties"),
        "idp.authn.LDAP.ldapURL = ldap://localhost:10389\n",
    )
    .unwrap();
    fs::write(
        template.join("metadata/idp-metadata.xml"),
        "<EntityDescriptor>\n\
         <SingleSignOnService Location=\"https://localhost/idp/profile/SAML2/Redirect/SSO\"/>\n\
         <ArtifactResolutionService Location=\"https://localhost:8443/idp/profile/SAML2/SOAP/ArtifactResolution\"/>\n\
         </EntityDescriptor>\n",
    )
    .unwrap();
    fs::write(template.join("credentials/idp.key"), "key material").unwrap();

    let jetty_home = build_dir.join("jetty-home-12.0.9");
    fs::create_dir_all(&jetty_home).unwrap();
    fs::write(jetty_home.join("start.jar"), "").unwrap();
}

fn orchestrator_for(build_dir: &Path, test_name: &str, status_url: String) -> TestOrchestrator {
    let mut settings = idp_integration::harness::HarnessSettings::default();
    settings.build_dir = build_dir.to_path_buf();
    let server = ServerConfig::builder()
        .command_override(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            "sleep 300".to_string(),
        ])
        .status_url_override(status_url)
        .startup_budget(20, Duration::from_millis(50))
        .shutdown_budget(2, Duration::from_millis(50))
        .build();
    TestOrchestrator::builder()
        .settings(settings)
        .server(server)
        .test_name(test_name)
        .build()
}

#[test]
fn orchestrator_stages_patches_and_starts_then_cleans_up() {
    let dir = TempDir::new().unwrap();
    make_build_dir(dir.path());
    let url = spawn_responder(vec![sentinel_response()]);
    let mut orchestrator = orchestrator_for(dir.path(), "EndToEnd", url);

    orchestrator.set_up().unwrap();

    let urls = orchestrator.base_urls().unwrap().clone();
    let ports = *orchestrator.ports().unwrap();
    assert_eq!(
        urls.https_base,
        format!("https://localhost:{}/idp", ports.https)
    );
    assert_eq!(urls.advertised(), urls.https_base);

    let home = orchestrator.home().unwrap().root().to_path_buf();
    let idp_properties = fs::read_to_string(home.join("conf/idp.properties")).unwrap();
    assert!(idp_properties.contains(&format!("idp.baseurl = {}", urls.https_base)));
    assert!(idp_properties.contains(&format!("idp.backchannel.port = {}", ports.backchannel)));

    let metadata = fs::read_to_string(home.join("metadata/idp-metadata.xml")).unwrap();
    assert!(metadata.contains(&format!("{}/profile/SAML2/Redirect/SSO", urls.https_base)));
    assert!(metadata.contains(&format!(
        "{}/profile/SAML2/SOAP/ArtifactResolution",
        urls.backchannel_base
    )));
    assert!(!metadata.contains("https://localhost/idp"));
    assert!(!metadata.contains("https://localhost:8443/idp"));

    let ldap = fs::read_to_string(home.join("conf/ldap.properties")).unwrap();
    assert!(ldap.contains(&format!("ldap://localhost:{}", ports.auxiliary)));

    assert_eq!(
        orchestrator.server().unwrap().state(),
        ServerState::Running
    );

    // Template stays pristine; only the staged copy was patched.
    let template = fs::read_to_string(
        dir.path().join("idp-server-5.1.3/conf/idp.properties"),
    )
    .unwrap();
    assert!(template.contains("idp.baseurl = https://localhost/idp"));

    let context_dir = orchestrator.context().base_dir().to_path_buf();
    assert!(context_dir.exists());
    orchestrator.tear_down().unwrap();
    assert!(!context_dir.exists());
}

#[test]
fn orchestrator_retains_staged_home_after_recorded_failure() {
    let dir = TempDir::new().unwrap();
    make_build_dir(dir.path());
    let url = spawn_responder(vec![sentinel_response()]);
    let mut orchestrator = orchestrator_for(dir.path(), "FailedClass", url);

    orchestrator.set_up().unwrap();
    orchestrator.record_failure();

    let context_dir = orchestrator.context().base_dir().to_path_buf();
    orchestrator.tear_down().unwrap();
    assert!(context_dir.exists(), "failed class keeps its artifacts");
}

#[test]
fn panicking_class_retains_staged_home() {
    let dir = TempDir::new().unwrap();
    make_build_dir(dir.path());
    let url = spawn_responder(vec![sentinel_response()]);
    let build_dir = dir.path().to_path_buf();

    let (tx, rx) = std::sync::mpsc::channel();
    let class = std::thread::Builder::new()
        .name("PanickingClass".to_string())
        .spawn(move || {
            let mut orchestrator = orchestrator_for(&build_dir, "PanickingClass", url);
            orchestrator.set_up().unwrap();
            tx.send(orchestrator.context().base_dir().to_path_buf()).unwrap();
            panic!("test body failure");
        })
        .unwrap();

    assert!(class.join().is_err());
    let context_dir = rx.recv().unwrap();
    assert!(
        context_dir.exists(),
        "staged home must survive a class that panicked before tear_down()"
    );
}

#[test]
fn orchestrator_setup_fails_without_a_distribution() {
    let dir = TempDir::new().unwrap();
    let url = spawn_responder(vec![sentinel_response()]);
    let mut orchestrator = orchestrator_for(dir.path(), "NoDistribution", url);

    assert!(matches!(
        orchestrator.set_up(),
        Err(HarnessError::DistributionNotFound { .. })
    ));
}

#[test]
fn second_set_up_is_rejected() {
    let dir = TempDir::new().unwrap();
    make_build_dir(dir.path());
    let url = spawn_responder(vec![sentinel_response()]);
    let mut orchestrator = orchestrator_for(dir.path(), "DoubleSetUp", url);

    orchestrator.set_up().unwrap();
    assert!(matches!(
        orchestrator.set_up(),
        Err(HarnessError::InvalidState { .. })
    ));
    orchestrator.tear_down().unwrap();
}
