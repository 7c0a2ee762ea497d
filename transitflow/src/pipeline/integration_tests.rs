//! Cross-module scenarios: pipelines against a scripted API and the
//! in-memory warehouse.

#[cfg(test)]
mod tests {
    use crate::api::{HttpResponse, SessionClient};
    use crate::cancellation::CancellationToken;
    use crate::errors::CycleError;
    use crate::loader::BulkLoader;
    use crate::mapping::map_line_variants;
    use crate::pipeline::{
        CycleContext, CycleReport, CycleState, CycleStatus, LinesPipeline, Pacing, Pipeline,
        PositionsPipeline, Scheduler, StopsPipeline,
    };
    use crate::query::distinct_keys;
    use crate::testing::{fixtures, MockTransport};
    use crate::warehouse::{InMemoryWarehouse, MockWarehouse, TableRef, WriteMode};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn positions_table() -> TableRef {
        TableRef::new("proj", "transit", "sptrans_posicoes")
    }

    fn lines_table() -> TableRef {
        TableRef::new("proj", "transit", "sptrans_linhas")
    }

    fn stops_table() -> TableRef {
        TableRef::new("proj", "transit", "sptrans_paradas")
    }

    fn warehouse() -> Arc<InMemoryWarehouse> {
        Arc::new(InMemoryWarehouse::with_clock(Arc::new(fixtures::frozen_clock())))
    }

    fn client(transport: &MockTransport) -> SessionClient<MockTransport> {
        SessionClient::new("http://api.example/v2.1", "secret", transport.clone())
    }

    fn positions(
        transport: &MockTransport,
        warehouse: &Arc<InMemoryWarehouse>,
    ) -> PositionsPipeline<MockTransport> {
        PositionsPipeline::new(client(transport), BulkLoader::new(warehouse.clone()), positions_table())
            .with_clock(Arc::new(fixtures::frozen_clock()))
    }

    fn lines(transport: &MockTransport, warehouse: &Arc<InMemoryWarehouse>) -> LinesPipeline<MockTransport> {
        LinesPipeline::new(
            client(transport),
            BulkLoader::new(warehouse.clone()),
            positions_table(),
            lines_table(),
        )
        .with_clock(Arc::new(fixtures::frozen_clock()))
        .with_courtesy_delay(Duration::ZERO)
    }

    fn stops(transport: &MockTransport, warehouse: &Arc<InMemoryWarehouse>) -> StopsPipeline<MockTransport> {
        StopsPipeline::new(
            client(transport),
            BulkLoader::new(warehouse.clone()),
            lines_table(),
            stops_table(),
        )
        .with_clock(Arc::new(fixtures::frozen_clock()))
        .with_courtesy_delay(Duration::ZERO)
    }

    fn scheduler<P: Pipeline>(pipeline: P) -> Scheduler<P> {
        Scheduler::new(pipeline, Arc::new(CancellationToken::new()))
    }

    /// Records the start of every cycle and then works for a fixed time.
    struct TimedWork {
        pacing: Pacing,
        work: Duration,
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl Pipeline for TimedWork {
        fn name(&self) -> &str {
            "timed"
        }

        fn pacing(&self) -> Pacing {
            self.pacing
        }

        async fn run_cycle(&mut self, _ctx: &mut CycleContext) -> Result<CycleReport, CycleError> {
            self.starts.lock().push(Instant::now());
            tokio::time::sleep(self.work).await;
            Ok(CycleReport::loaded(0, 0))
        }
    }

    async fn cycle_gaps(pacing: Pacing, work: Duration, run_for: Duration) -> Vec<Duration> {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let token = Arc::new(CancellationToken::new());
        let pipeline = TimedWork {
            pacing,
            work,
            starts: starts.clone(),
        };
        let handle = tokio::spawn(Scheduler::new(pipeline, token.clone()).run());

        tokio::time::sleep(run_for).await;
        token.cancel("test finished");
        handle.await.unwrap();

        let starts = starts.lock().clone();
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_short_cycles_start_a_minute_apart() {
        let gaps = cycle_gaps(
            Pacing::FixedRate(Duration::from_secs(60)),
            Duration::from_secs(5),
            Duration::from_secs(150),
        )
        .await;

        assert_eq!(gaps, vec![Duration::from_secs(60), Duration::from_secs(60)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_long_cycles_do_not_sleep() {
        let gaps = cycle_gaps(
            Pacing::FixedRate(Duration::from_secs(60)),
            Duration::from_secs(75),
            Duration::from_secs(200),
        )
        .await;

        assert_eq!(gaps, vec![Duration::from_secs(75), Duration::from_secs(75)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_delay_gap_is_delay_plus_work() {
        let gaps = cycle_gaps(
            Pacing::FixedDelay(Duration::from_secs(86_400)),
            Duration::from_secs(3),
            Duration::from_secs(2 * 86_400),
        )
        .await;

        assert_eq!(gaps, vec![Duration::from_secs(86_403)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_pacing_sleep() {
        let token = Arc::new(CancellationToken::new());
        let pipeline = TimedWork {
            pacing: Pacing::FixedDelay(Duration::from_secs(86_400)),
            work: Duration::from_secs(1),
            starts: Arc::new(Mutex::new(Vec::new())),
        };
        let handle = tokio::spawn(Scheduler::new(pipeline, token.clone()).run());

        tokio::time::sleep(Duration::from_secs(10)).await;
        let cancelled_at = Instant::now();
        token.cancel("ctrl-c");
        let cycles = handle.await.unwrap();

        assert_eq!(cycles, 1);
        assert!(Instant::now() - cancelled_at < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_waits_for_running_cycle() {
        let token = Arc::new(CancellationToken::new());
        let starts = Arc::new(Mutex::new(Vec::new()));
        let pipeline = TimedWork {
            pacing: Pacing::FixedRate(Duration::from_secs(60)),
            work: Duration::from_secs(30),
            starts: starts.clone(),
        };
        let handle = tokio::spawn(Scheduler::new(pipeline, token.clone()).run());

        tokio::time::sleep(Duration::from_secs(10)).await;
        token.cancel("ctrl-c");
        let cycles = handle.await.unwrap();

        assert_eq!(cycles, 1);
        assert!(Instant::now() - starts.lock()[0] >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_positions_loop_reuses_session() {
        let transport = MockTransport::new();
        transport.set_latency(Duration::from_secs(5));
        for i in 0..3 {
            let code = format!("800{i}-10");
            transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[(code.as_str(), 2)])));
        }
        let wh = warehouse();
        let token = Arc::new(CancellationToken::new());
        let handle = tokio::spawn(Scheduler::new(positions(&transport, &wh), token.clone()).run());

        tokio::time::sleep(Duration::from_secs(130)).await;
        token.cancel("test finished");
        handle.await.unwrap();

        assert_eq!(transport.login_count(), 1);
        assert_eq!(transport.get_count(), 3);
        assert_eq!(wh.load_count(), 3);
        assert_eq!(wh.rows(&positions_table()).len(), 6);
    }

    #[tokio::test]
    async fn test_positions_cycle_appends_rows() {
        let transport = MockTransport::new();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 3),
            ("1012-10", 1),
        ])));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Loaded);
        assert_eq!(outcome.rows, 4);
        assert_eq!(outcome.loaded, 4);
        assert_eq!(
            outcome.transitions,
            vec![
                CycleState::Authenticating,
                CycleState::Fetching,
                CycleState::Mapping,
                CycleState::Loading,
                CycleState::Sleeping,
            ]
        );
        let loads = wh.loads();
        assert_eq!(loads[0].mode, WriteMode::Append);
        assert_eq!(loads[0].table, positions_table());
    }

    #[tokio::test]
    async fn test_positions_empty_payload_skips() {
        let transport = MockTransport::new();
        transport.push_get(HttpResponse::new(200, "null"));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Skipped);
        assert_eq!(wh.load_count(), 0);
    }

    #[tokio::test]
    async fn test_positions_failure_reauthenticates() {
        let transport = MockTransport::new();
        transport.push_get(HttpResponse::new(503, "Service Unavailable"));
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[("8000-10", 1)])));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let failed = scheduler.run_once().await;
        assert_eq!(failed.status, CycleStatus::Failed);
        assert_eq!(failed.error_kind, Some("server"));
        assert_eq!(transport.login_count(), 2);
        assert!(scheduler.pipeline().client().is_authenticated());

        let next = scheduler.run_once().await;
        assert_eq!(next.status, CycleStatus::Loaded);
        assert_eq!(transport.login_count(), 2);
    }

    #[tokio::test]
    async fn test_positions_unauthorized_after_retry() {
        let transport = MockTransport::new();
        transport.push_get(HttpResponse::new(401, ""));
        transport.push_get(HttpResponse::new(401, ""));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.error_kind, Some("unauthorized"));
        assert_eq!(transport.get_count(), 2);
        // initial login, one retry login, one recovery login
        assert_eq!(transport.login_count(), 3);
    }

    #[tokio::test]
    async fn test_positions_rejected_login_ends_cycle() {
        let transport = MockTransport::new();
        transport.push_login(HttpResponse::new(200, "false"));
        transport.push_login(HttpResponse::new(200, "false"));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.error_kind, Some("auth"));
        assert!(outcome.detail.unwrap().contains("false"));
        assert_eq!(transport.get_count(), 0);
        assert!(!scheduler.pipeline().client().is_authenticated());
    }

    #[tokio::test]
    async fn test_positions_login_network_failure_is_retried_by_recovery() {
        let transport = MockTransport::new();
        transport.push_login_error("connection refused");
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[("8000-10", 2)])));
        let wh = warehouse();
        let mut scheduler = scheduler(positions(&transport, &wh));

        let failed = scheduler.run_once().await;

        assert_eq!(failed.status, CycleStatus::Failed);
        assert_eq!(failed.error_kind, Some("auth"));
        assert!(failed.detail.unwrap().contains("connection refused"));
        assert_eq!(
            failed.transitions,
            vec![CycleState::Authenticating, CycleState::Sleeping]
        );
        assert_eq!(transport.get_count(), 0);
        assert_eq!(wh.load_count(), 0);
        assert_eq!(transport.login_count(), 2);
        assert!(scheduler.pipeline().client().is_authenticated());

        let next = scheduler.run_once().await;
        assert_eq!(next.status, CycleStatus::Loaded);
        assert_eq!(transport.login_count(), 2);
    }

    #[tokio::test]
    async fn test_enrichment_login_network_failure_aborts_cycle() {
        let transport = MockTransport::new();
        transport.push_login_error("connection reset by peer");
        let mut wh = MockWarehouse::new();
        wh.expect_query().times(0);
        wh.expect_load().times(0);
        let pipeline = LinesPipeline::new(
            client(&transport),
            BulkLoader::new(Arc::new(wh)),
            positions_table(),
            lines_table(),
        );
        let mut scheduler = scheduler(pipeline);

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.error_kind, Some("auth"));
        assert_eq!(
            outcome.transitions,
            vec![CycleState::Authenticating, CycleState::Sleeping]
        );
        assert_eq!(transport.get_count(), 0);
    }

    #[tokio::test]
    async fn test_relogin_network_failure_mid_key_aborts_enrichment() {
        let transport = MockTransport::new();
        let wh = warehouse();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 1),
            ("1012-10", 1),
        ])));
        scheduler(positions(&transport, &wh)).run_once().await;
        let loads_before = wh.load_count();

        transport.push_login(HttpResponse::new(200, "true"));
        transport.push_get(HttpResponse::new(401, ""));
        transport.push_login_error("connection reset by peer");
        let outcome = scheduler(lines(&transport, &wh)).run_once().await;

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.error_kind, Some("auth"));
        assert!(outcome.detail.unwrap().contains("connection reset by peer"));
        assert!(!outcome.transitions.contains(&CycleState::Loading));
        // one lookup for the first key, none for the second
        assert_eq!(transport.get_count(), 2);
        assert_eq!(wh.load_count(), loads_before);
    }

    #[tokio::test]
    async fn test_lines_without_keys_makes_no_calls() {
        let transport = MockTransport::new();
        let mut wh = MockWarehouse::new();
        wh.expect_query().times(1).returning(|_| Ok(Vec::new()));
        wh.expect_load().times(0);
        let pipeline = LinesPipeline::new(
            client(&transport),
            BulkLoader::new(Arc::new(wh)),
            positions_table(),
            lines_table(),
        );
        let mut scheduler = scheduler(pipeline);

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Skipped);
        assert_eq!(transport.get_count(), 0);
    }

    #[tokio::test]
    async fn test_stops_without_keys_makes_no_calls() {
        let transport = MockTransport::new();
        let wh = warehouse();
        let mut scheduler = scheduler(stops(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Skipped);
        assert_eq!(transport.get_count(), 0);
        assert_eq!(wh.query_count(), 1);
        assert_eq!(wh.load_count(), 0);
    }

    #[tokio::test]
    async fn test_query_failure_skips_enrichment() {
        let transport = MockTransport::new();
        let wh = warehouse();
        wh.fail_queries(true);
        let mut scheduler = scheduler(lines(&transport, &wh));

        let outcome = scheduler.run_once().await;

        assert_eq!(outcome.status, CycleStatus::Skipped);
        assert_eq!(transport.get_count(), 0);
    }

    #[tokio::test]
    async fn test_truncate_round_trip() {
        let wh = warehouse();
        let loader = BulkLoader::new(wh.clone());
        let clock = fixtures::frozen_clock();
        let rows = map_line_variants("8000-10", &fixtures::line_variants(&[1273, 34041]), &clock);
        let columns = ["fetch_time", "line_c", "cl", "lc", "lt", "tl", "sl", "tp", "ts"];

        loader
            .load(&lines_table(), &map_line_variants("9999-10", &fixtures::line_variants(&[1]), &clock), WriteMode::Truncate)
            .await
            .unwrap();
        loader.load(&lines_table(), &rows, WriteMode::Truncate).await.unwrap();
        let read = distinct_keys(wh.as_ref(), &lines_table(), &columns, "cl").await;

        let expected: Vec<Value> = rows.iter().map(|r| serde_json::to_value(r).unwrap()).collect();
        let actual: Vec<Value> = read.into_iter().map(Value::Object).collect();
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_enrichment_chain_end_to_end() {
        let transport = MockTransport::new();
        let wh = warehouse();

        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 3),
            ("1012-10", 1),
        ])));
        let positions_outcome = scheduler(positions(&transport, &wh)).run_once().await;
        assert_eq!(positions_outcome.loaded, 4);

        transport.push_get(fixtures::ok_json(&fixtures::line_variants(&[1273, 34041])));
        transport.push_get(fixtures::ok_json(&fixtures::line_variants(&[2000])));
        let lines_outcome = scheduler(lines(&transport, &wh)).run_once().await;
        assert_eq!(lines_outcome.status, CycleStatus::Loaded);
        assert_eq!(lines_outcome.loaded, 3);

        transport.push_get(fixtures::ok_json(&fixtures::stops(2)));
        transport.push_get(fixtures::ok_json(&fixtures::stops(1)));
        transport.push_get(fixtures::ok_json(&fixtures::stops(3)));
        let stops_outcome = scheduler(stops(&transport, &wh)).run_once().await;
        assert_eq!(stops_outcome.loaded, 6);

        let searched: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.url.ends_with("/Linha/Buscar"))
            .map(|c| c.query[0].1.clone())
            .collect();
        assert_eq!(searched, vec!["8000-10".to_string(), "1012-10".to_string()]);

        let stop_lookups: Vec<_> = transport
            .calls()
            .into_iter()
            .filter(|c| c.url.ends_with("/Parada/BuscarParadasPorLinha"))
            .map(|c| c.query[0].1.clone())
            .collect();
        assert_eq!(stop_lookups, vec!["1273", "34041", "2000"]);

        let stops = wh.rows(&stops_table());
        assert_eq!(stops.len(), 6);
        assert!(stops[..2].iter().all(|r| r["cl"] == 1273 && r["line_c"] == "8000-10"));
        assert_eq!(stops[2]["cl"], 34041);
        assert!(stops[3..].iter().all(|r| r["cl"] == 2000 && r["line_c"] == "1012-10"));
    }

    #[tokio::test]
    async fn test_lines_truncate_replaces_previous_cycle() {
        let transport = MockTransport::new();
        let wh = warehouse();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[("8000-10", 1)])));
        scheduler(positions(&transport, &wh)).run_once().await;

        let mut lines = scheduler(lines(&transport, &wh));
        transport.push_get(fixtures::ok_json(&fixtures::line_variants(&[1, 2, 3])));
        lines.run_once().await;
        transport.push_get(fixtures::ok_json(&fixtures::line_variants(&[4])));
        lines.run_once().await;

        let rows = wh.rows(&lines_table());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["cl"], 4);
        assert_eq!(transport.login_count(), 3);
    }

    #[tokio::test]
    async fn test_per_key_failure_is_skipped() {
        let transport = MockTransport::new();
        let wh = warehouse();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 1),
            ("1012-10", 1),
        ])));
        scheduler(positions(&transport, &wh)).run_once().await;

        transport.push_get(HttpResponse::new(500, "Internal Server Error"));
        transport.push_get(fixtures::ok_json(&fixtures::line_variants(&[2000])));
        let outcome = scheduler(lines(&transport, &wh)).run_once().await;

        assert_eq!(outcome.status, CycleStatus::Loaded);
        assert_eq!(outcome.rows, 1);
        let rows = wh.rows(&lines_table());
        assert_eq!(rows[0]["line_c"], "1012-10");
    }

    #[tokio::test]
    async fn test_auth_failure_aborts_enrichment() {
        let transport = MockTransport::new();
        let wh = warehouse();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 1),
            ("1012-10", 1),
        ])));
        scheduler(positions(&transport, &wh)).run_once().await;
        let loads_before = wh.load_count();

        transport.push_login(HttpResponse::new(200, "true"));
        transport.push_get(HttpResponse::new(403, "Forbidden"));
        transport.push_login(HttpResponse::new(200, "false"));
        let outcome = scheduler(lines(&transport, &wh)).run_once().await;

        assert_eq!(outcome.status, CycleStatus::Failed);
        assert_eq!(outcome.error_kind, Some("auth"));
        assert_eq!(wh.load_count(), loads_before);
        assert!(wh.rows(&lines_table()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_courtesy_delay_between_keys() {
        let transport = MockTransport::new();
        let wh = warehouse();
        transport.push_get(fixtures::ok_json(&fixtures::position_snapshot(&[
            ("8000-10", 1),
            ("1012-10", 1),
            ("N137-11", 1),
        ])));
        scheduler(positions(&transport, &wh)).run_once().await;

        let pipeline = lines(&transport, &wh).with_courtesy_delay(Duration::from_millis(300));
        let outcome = scheduler(pipeline).run_once().await;

        assert_eq!(outcome.elapsed, Duration::from_millis(600));
    }
}
