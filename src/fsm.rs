//! FSM engine (C5, SPEC_FULL.md §4.3).
//!
//! `Start → WaitForSale → {QueryToken|CreateOrder} → ... → Done`, ported
//! directly from `original_source/util/Task/__init__.py`'s
//! `transitions.Machine` definition into an explicit Rust `State` enum with
//! the transition guards compiled as `match` arms — the idiomatic Rust
//! rendering of what the Python encodes as runtime `add_transition` calls
//! (Design Note 6). Structurally this follows
//! `transfer::coordinator::TransferCoordinator::step`'s shape (one action
//! method per state, returning the next state) rather than a generic
//! dynamic transition table.

use crate::api::{ChallengeType, CreateOrderEffect, OrderContext, ProjectSnapshot, RiskContext, VendorClient};
use crate::challenge::ChallengeResolver;
use crate::config::TargetSpec;
use crate::core_types::VendorCode;
use crate::notify::SuccessRecord;
use crate::schedule::{self, Schedule};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    WaitForSale,
    QueryToken,
    RiskChallenge,
    WaitForStock,
    CreateOrder,
    ConfirmOrder,
    Done,
}

enum Outcome {
    Next(State),
    Fatal(VendorCode, String),
}

/// Outcome of a full acquisition run.
#[derive(Debug)]
pub enum RunResult {
    Success(SuccessRecord),
    Fatal { code: VendorCode, msg: String },
    Interrupted,
}

/// Drives the whole acquisition loop. All mutable acquisition state
/// (`Schedule`, `OrderContext`, `RiskContext`, `ProjectSnapshot`, and the
/// process-scoped `scene` string) lives here and nowhere else — per
/// SPEC_FULL.md §3 "Ownership", no concurrent mutation exists during the
/// loop.
pub struct Fsm {
    api: VendorClient,
    resolver: Arc<dyn ChallengeResolver>,
    target: TargetSpec,
    schedule: Schedule,
    snapshot: ProjectSnapshot,
    order: OrderContext,
    risk: RiskContext,
    /// `requestSource` sent on every call. Starts as `"neul-next"`; a
    /// risk-required `Prepare` response can overwrite it with the vendor's
    /// own `riskParams.scene`, and per Design Note "Timing precision" /
    /// the Open Question on scene mutation, that overwrite is kept and
    /// allowed to persist across the following fresh `Prepare` rather than
    /// reset — see DESIGN.md.
    scene: String,
    /// `true` once a pre-warmed token is in hand at T-30s, routing
    /// `WaitForSale` straight to `CreateOrder`.
    skip_token: bool,
    /// `true` once the one opportunistic `ProjectInfo` cache-seed has been
    /// attempted (Invariant 5).
    query_cache: bool,
    /// Vendor's public geetest site key, used when a risk-register response
    /// omits its own `gt` (shouldn't happen in practice, but `gt` is
    /// otherwise a process-wide constant per SPEC_FULL.md §4.4).
    default_gt: String,
}

impl Fsm {
    pub fn new(
        api: VendorClient,
        resolver: Arc<dyn ChallengeResolver>,
        target: TargetSpec,
        schedule: Schedule,
        default_gt: String,
    ) -> Self {
        Fsm {
            api,
            resolver,
            target,
            schedule,
            snapshot: ProjectSnapshot::default(),
            order: OrderContext::default(),
            risk: RiskContext::default(),
            scene: "neul-next".to_string(),
            skip_token: false,
            query_cache: false,
            default_gt,
        }
    }

    pub async fn run(&mut self) -> RunResult {
        let mut state = State::Start;
        loop {
            if state == State::Done {
                return RunResult::Success(self.success_record());
            }

            let outcome = tokio::select! {
                biased;
                _ = tokio::signal::ctrl_c() => {
                    warn!("acquisition interrupted by operator");
                    return RunResult::Interrupted;
                }
                outcome = self.step(state) => outcome,
            };

            state = match outcome {
                Outcome::Next(next) => next,
                Outcome::Fatal(code, msg) => {
                    error!(code = code.0, %msg, "fatal vendor response, terminating");
                    return RunResult::Fatal { code, msg };
                }
            };
        }
    }

    async fn step(&mut self, state: State) -> Outcome {
        match state {
            State::Start => Outcome::Next(State::WaitForSale),
            State::WaitForSale => self.action_wait_for_sale().await,
            State::QueryToken => self.action_query_token().await,
            State::RiskChallenge => self.action_risk_challenge().await,
            State::WaitForStock => self.action_wait_for_stock().await,
            State::CreateOrder => self.action_create_order().await,
            State::ConfirmOrder => self.action_confirm_order().await,
            State::Done => unreachable!("Done is handled by run() before dispatch"),
        }
    }

    fn success_record(&self) -> SuccessRecord {
        match self.order.order_id {
            Some(id) => SuccessRecord::for_order(id),
            None => SuccessRecord {
                order_id: None,
                title: "Ticket secured".to_string(),
                message: "order locked".to_string(),
            },
        }
    }

    /// `WaitForSale` action (§4.3): sleeps through the coarse countdown
    /// tiers, pre-warming the token at T-30s, and exits as soon as the
    /// countdown reaches zero or is already past (Testable Property
    /// boundary behaviors).
    async fn action_wait_for_sale(&mut self) -> Outcome {
        let (code, msg, snapshot) = self.api.project_info(&self.scene).await;
        if !code.is_success() {
            error!(code = code.0, %msg, "failed to fetch sale-start countdown");
        }
        if let Some(snap) = snapshot {
            self.snapshot = snap;
            self.query_cache = true;
        }
        let sale_start = self.snapshot.sale_start;

        loop {
            let now = schedule::now_unix();
            let countdown = sale_start - now;
            if countdown <= 0 {
                info!("sale window reached, entering acquisition mode");
                break;
            }

            match schedule::classify_countdown(countdown) {
                schedule::CountdownTier::Hours => {
                    info!(countdown, "waiting for sale to open");
                    tokio::time::sleep(Duration::from_secs(600)).await;
                }
                schedule::CountdownTier::TensOfMinutes => {
                    info!(countdown, "waiting for sale to open");
                    tokio::time::sleep(Duration::from_secs(60)).await;
                }
                schedule::CountdownTier::Minutes => {
                    info!(countdown, "sale opening soon");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                schedule::CountdownTier::PreWarm => {
                    self.prewarm_token().await;
                }
                schedule::CountdownTier::FinalMinute => {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                schedule::CountdownTier::Sliver => {
                    let pad = schedule::CLOCK_SKEW_PAD_SECONDS;
                    tokio::time::sleep(Duration::from_secs_f64(countdown.max(0) as f64 + pad)).await;
                }
            }
        }

        Outcome::Next(if self.skip_token { State::CreateOrder } else { State::QueryToken })
    }

    /// Pre-warm at T-30s: run `Prepare` (and one risk-challenge attempt if
    /// needed) so the token is in hand at T-0, unconditionally setting
    /// `skip_token` — matching `original_source`'s single-shot pre-warm,
    /// which sets `skipToken=True` regardless of outcome because a stale
    /// token is still cheaply detected and recovered from once acquisition
    /// formally starts (token-stale routes `CreateOrder → QueryToken`).
    async fn prewarm_token(&mut self) {
        info!("pre-warming token at T-30s");
        let code = self.do_prepare().await;
        self.skip_token = true;
        if code == VendorCode::RISK_REQUIRED {
            let _ = self.action_risk_challenge().await;
        }
    }

    /// `QueryToken` action (§4.3): calls `Prepare`, opportunistically seeds
    /// the `ProjectSnapshot` cache exactly once (Invariant 5).
    async fn action_query_token(&mut self) -> Outcome {
        if !self.query_cache {
            let (_code, _msg, snapshot) = self.api.project_info(&self.scene).await;
            if let Some(snap) = snapshot {
                self.snapshot = snap;
            }
            self.query_cache = true;
        }

        let code = self.do_prepare().await;

        if code.is_fatal() {
            return Outcome::Fatal(code, "fatal vendor code on prepare".to_string());
        }

        if code.is_success() {
            return Outcome::Next(State::CreateOrder);
        }
        if code == VendorCode::RISK_REQUIRED {
            return Outcome::Next(State::RiskChallenge);
        }

        tokio::time::sleep(Duration::from_secs_f64(self.schedule.default_sleep)).await;
        Outcome::Next(State::QueryToken)
    }

    /// Shared `Prepare` call used by both the formal `QueryToken` state and
    /// the T-30s pre-warm. Clears `order.risked` as soon as the call
    /// completes, satisfying Invariant 2 ("observable only in the interval
    /// between a successful RiskValidate and the next Prepare").
    async fn do_prepare(&mut self) -> VendorCode {
        let (code, msg, token, risk) = self.api.prepare(&self.scene, &self.order).await;
        self.order.risked = false;

        match code.0 {
            0 => {
                self.order.token = token;
            }
            -401 => {
                if let Some(r) = risk {
                    if let Some(scene) = &r.scene {
                        self.scene = scene.clone();
                    }
                    self.risk = r;
                }
            }
            _ => {
                warn!(code = code.0, %msg, "prepare failed");
            }
        }
        code
    }

    /// `RiskChallenge` action (§4.3): registers for a challenge, dispatches
    /// on its type, and validates. Code `100000` ("already solved
    /// elsewhere") is a no-op success per the adapter contract.
    async fn action_risk_challenge(&mut self) -> Outcome {
        let (code, msg, token, updated_risk) = self.api.risk_register(&self.risk).await;

        if code.0 == 100_000 {
            info!(%msg, "risk already resolved elsewhere");
            return Outcome::Next(State::QueryToken);
        }
        if !code.is_success() {
            warn!(code = code.0, %msg, "risk register failed");
            return Outcome::Next(State::RiskChallenge);
        }

        if let Some(t) = token {
            self.order.token = Some(t);
        }
        if let Some(r) = updated_risk {
            self.risk = r;
        }

        let validate_code = match self.risk.challenge_type {
            Some(ChallengeType::Geetest) => self.resolve_geetest().await,
            Some(ChallengeType::Phone) => self.resolve_phone().await,
            Some(other) => {
                warn!(?other, "unsupported challenge type");
                VendorCode(114_514)
            }
            None => VendorCode(114_514),
        };

        if validate_code.is_success() {
            self.order.risked = true;
            Outcome::Next(State::QueryToken)
        } else {
            Outcome::Next(State::RiskChallenge)
        }
    }

    async fn resolve_geetest(&mut self) -> VendorCode {
        let gt = self.risk.gt.clone().unwrap_or_else(|| self.default_gt.clone());
        let challenge = self.risk.challenge.clone().unwrap_or_default();
        let token = self.order.token.clone().unwrap_or_default();

        match self.resolver.solve(&gt, &challenge).await {
            Ok(validate) => {
                let (code, msg) = self.api.risk_validate_geetest(&self.risk, &token, &validate).await;
                if !code.is_success() {
                    warn!(code = code.0, %msg, "geetest validate failed");
                }
                code
            }
            Err(e) => {
                warn!(error = %e, "challenge resolver failed to produce a validate string");
                VendorCode(114_514)
            }
        }
    }

    async fn resolve_phone(&mut self) -> VendorCode {
        let token = self.order.token.clone().unwrap_or_default();
        let (code, msg) = self.api.risk_validate_phone(&token).await;
        if !code.is_success() {
            warn!(code = code.0, %msg, "phone validate failed");
        }
        code
    }

    /// `WaitForStock` action (§4.3): availability is `clickable ∨ saleFlag
    /// ≠ 4 ∨ remainingCount > 0`.
    async fn action_wait_for_stock(&mut self) -> Outcome {
        let (code, msg, snapshot) = self.api.project_info(&self.scene).await;
        let now = schedule::now_unix();
        if let Some(snap) = snapshot {
            self.snapshot = snap;
        }

        let available = if code.is_success() {
            self.snapshot
                .locate(self.target.session_id, self.target.sku_id)
                .map(|(_, sku)| sku.clickable || sku.sale_flag != 4 || sku.remaining_count > 0)
                .unwrap_or(false)
        } else {
            warn!(code = code.0, %msg, "project info poll failed");
            false
        };

        if available {
            self.schedule.mark_stock_seen(now);
            return Outcome::Next(State::CreateOrder);
        }

        if !self.schedule.within_refresh_interval(now) {
            return Outcome::Next(State::CreateOrder);
        }

        tokio::time::sleep(Duration::from_secs_f64(self.schedule.default_sleep)).await;
        Outcome::Next(State::WaitForStock)
    }

    /// `CreateOrder` action (§4.3): races to lock the order, handling the
    /// price-drift (100034) and missing-contact (209001) self-heals
    /// in-line before consulting the transition guards.
    async fn action_create_order(&mut self) -> Outcome {
        let now = schedule::now_unix();
        self.schedule.mark_create_attempt(now);

        if self.order.pay_money == crate::core_types::Fen::zero() {
            self.order.pay_money = self.expected_pay_money();
        }

        let delivery = if self.snapshot.requires_paper_delivery {
            self.target.delivery.as_ref()
        } else {
            None
        };
        let (code, msg, effect) = self.api.create_order(&self.scene, &self.order, delivery).await;

        match effect {
            Some(CreateOrderEffect::PriceDrift { pay_money: Some(p) }) => {
                info!(pay_money = p.0, "price drift, updating expected pay_money and retrying");
                self.order.pay_money = p;
                return Outcome::Next(State::CreateOrder);
            }
            Some(CreateOrderEffect::ContactSaved) => {
                if self.order.contact_saved {
                    return Outcome::Fatal(code, "contact info still missing after self-heal".to_string());
                }
                self.order.contact_saved = true;
                return Outcome::Next(State::CreateOrder);
            }
            Some(CreateOrderEffect::Created { order_id, order_token }) => {
                self.order.order_id = order_id;
                self.order.order_token = order_token;
            }
            _ => {}
        }

        if code.is_success() {
            self.schedule.mark_stock_seen(now);
            return Outcome::Next(State::ConfirmOrder);
        }

        if code.is_token_stale_on_create() {
            info!("create-order token stale, refreshing");
            return Outcome::Next(State::QueryToken);
        }

        if code.is_duplicate_unpaid() {
            info!(%msg, "duplicate unpaid order exists, treating as success");
            return Outcome::Next(State::Done);
        }

        if code.is_err3() {
            warn!("ERR3: vendor suspects multiple concurrent scripts against this identity");
            self.schedule.mark_err3(now);
            let sleep_secs = self.schedule.next_create_sleep(now);
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            return Outcome::Next(State::CreateOrder);
        }

        if code.is_fatal() {
            return Outcome::Fatal(code, msg);
        }

        let keep_hammering = matches!(code.0, 429 | 100_001) || self.schedule.within_available_window(now);
        if keep_hammering {
            let sleep_secs = self.schedule.next_create_sleep(now);
            tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;
            Outcome::Next(State::CreateOrder)
        } else {
            Outcome::Next(State::WaitForStock)
        }
    }

    /// `pay_money = price * count (+ delivery fee when paper delivery is
    /// required)` (§4.2 point 5). Computed once, the first time
    /// `CreateOrder` runs; a `100034` price-drift bounce from the server
    /// overrides it afterward rather than this estimate ever being
    /// recomputed in place.
    fn expected_pay_money(&mut self) -> crate::core_types::Fen {
        let Some((session, sku)) = self.snapshot.locate(self.target.session_id, self.target.sku_id) else {
            return crate::core_types::Fen::zero();
        };
        let subtotal = sku.price.checked_mul(self.target.count as u64).unwrap_or(sku.price);
        if self.snapshot.requires_paper_delivery {
            subtotal.checked_add(session.delivery_fee).unwrap_or(subtotal)
        } else {
            subtotal
        }
    }

    /// `ConfirmOrder` action (§4.3): any non-zero at either step routes
    /// back to `CreateOrder` ("fake lock — try again").
    async fn action_confirm_order(&mut self) -> Outcome {
        let order_id = match self.order.order_id {
            Some(id) => id,
            None => return Outcome::Next(State::CreateOrder),
        };
        let order_token = self.order.order_token.clone().unwrap_or_default();

        let (status_code, status_msg) = self.api.create_order_status(&order_token, order_id).await;
        if !status_code.is_success() {
            warn!(code = status_code.0, %status_msg, "lock status not confirmed, fake lock — retrying");
            return Outcome::Next(State::CreateOrder);
        }

        let (info_code, info_msg) = self.api.order_info(order_id).await;
        if !info_code.is_success() {
            warn!(code = info_code.0, %info_msg, "order not yet visible, retrying");
            return Outcome::Next(State::CreateOrder);
        }

        Outcome::Next(State::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Attendee, TargetSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Replays a fixed queue of JSON bodies in order, one per matched
    /// request — deterministic regardless of wiremock's own mock-selection
    /// order, which is what scenarios S2/S3 need (two different codes from
    /// the *same* endpoint across consecutive calls).
    struct Sequence {
        bodies: Mutex<VecDeque<serde_json::Value>>,
    }

    impl Sequence {
        fn new(bodies: Vec<serde_json::Value>) -> Self {
            Sequence { bodies: Mutex::new(bodies.into()) }
        }
    }

    impl Respond for Sequence {
        fn respond(&self, _request: &Request) -> ResponseTemplate {
            let body = self.bodies.lock().unwrap().pop_front().expect("sequence exhausted");
            ResponseTemplate::new(200).set_body_json(body)
        }
    }

    #[derive(Debug)]
    struct AlwaysOkResolver;

    #[async_trait]
    impl ChallengeResolver for AlwaysOkResolver {
        async fn solve(&self, _gt: &str, _challenge: &str) -> Result<String, crate::error::ChallengeError> {
            Ok("OK".to_string())
        }
    }

    fn target() -> TargetSpec {
        TargetSpec {
            project_id: 1,
            session_id: 1,
            sku_id: 1,
            order_type: 1,
            count: 1,
            attendees: vec![Attendee(json!({"name": "a"}))],
            delivery: None,
            phone: String::new(),
            username: String::new(),
            uid: 0,
        }
    }

    async fn fsm_against(mock: &MockServer) -> Fsm {
        let mut cookies = HashMap::new();
        cookies.insert("bili_jct".to_string(), "csrf-token".to_string());
        let http = crate::http::HttpClient::new(
            std::time::Duration::from_secs(5),
            30.0,
            None,
            &HashMap::new(),
            &cookies,
        )
        .unwrap();
        let api = VendorClient::with_hosts(http, target(), false, mock.uri(), mock.uri());
        let resolver: Arc<dyn ChallengeResolver> = Arc::new(AlwaysOkResolver);
        let mut fsm = Fsm::new(api, resolver, target(), Schedule::new(0.01, 2.1), "gt-default".to_string());
        fsm.query_cache = true; // skip the one-time ProjectInfo cache-seed for these tests
        fsm
    }

    /// S2 — token refresh mid-race: CreateOrder returns 100050 once, then 0.
    #[tokio::test]
    async fn s2_token_refresh_mid_race_reaches_confirm_order() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/createV2"))
            .respond_with(Sequence::new(vec![
                json!({"code": 100_050, "msg": "token stale", "data": {}}),
                json!({"code": 0, "msg": "ok", "data": {"orderId": 123, "token": "OT1"}}),
            ]))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/prepare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "ok", "data": {"token": "T1"}})))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;

        let outcome = fsm.action_create_order().await;
        assert!(matches!(outcome, Outcome::Next(State::QueryToken)));

        let outcome = fsm.action_query_token().await;
        assert!(matches!(outcome, Outcome::Next(State::CreateOrder)));
        assert_eq!(fsm.order.token.as_deref(), Some("T1"));

        let outcome = fsm.action_create_order().await;
        assert!(matches!(outcome, Outcome::Next(State::ConfirmOrder)));
        assert_eq!(fsm.order.order_id, Some(123));
    }

    /// S3 — risk challenge: Prepare returns -401 with a geetest challenge,
    /// the resolver solves it, and the gaia vtoken cookie gets set.
    #[tokio::test]
    async fn s3_risk_challenge_resolves_and_sets_gaia_vtoken() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/prepare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": -401,
                "msg": "risk",
                "data": { "ga_data": { "riskParams": {
                    "mid": 1, "buvid": "b", "ip": "1.2.3.4", "scene": "risk-scene",
                    "ua": "ua", "v_voucher": "vv", "decision_type": 1
                }}}
            })))
            .mount(&mock)
            .await;
        Mock::given(method("POST"))
            .and(path("/x/gaia-vgate/v1/register"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "msg": "ok",
                "data": { "token": "RISK-TOKEN", "geetest": { "challenge": "abc", "gt": "gt-value" } }
            })))
            .mount(&mock)
            .await;
        Mock::given(method("GET"))
            .and(path("/x/gaia-vgate/v1/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "msg": "ok", "data": { "is_valid": 1 }
            })))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;

        let outcome = fsm.action_query_token().await;
        assert!(matches!(outcome, Outcome::Next(State::RiskChallenge)));
        assert_eq!(fsm.scene, "risk-scene");

        let outcome = fsm.action_risk_challenge().await;
        assert!(matches!(outcome, Outcome::Next(State::QueryToken)));
        assert!(fsm.order.risked);
        assert_eq!(fsm.api.http_cookie("x-bili-gaia-vtoken"), Some("RISK-TOKEN".to_string()));
    }

    /// S4 — price drift: CreateOrder returns 100034 with a new pay_money;
    /// the FSM updates its expected amount and loops CreateOrder, no state change.
    #[tokio::test]
    async fn s4_price_drift_updates_pay_money_and_retries_create_order() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/createV2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 100_034, "msg": "price drift", "data": { "pay_money": 19900 }
            })))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;
        let outcome = fsm.action_create_order().await;

        assert!(matches!(outcome, Outcome::Next(State::CreateOrder)));
        assert_eq!(fsm.order.pay_money, crate::core_types::Fen(19900));
    }

    /// S5 — duplicate order already exists: CreateOrder returns 100079 with
    /// the existing orderId; the FSM jumps straight to Done.
    #[tokio::test]
    async fn s5_duplicate_unpaid_order_jumps_to_done() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/createV2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 100_079, "msg": "duplicate", "data": { "orderId": 999 }
            })))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;
        let outcome = fsm.action_create_order().await;

        assert!(matches!(outcome, Outcome::Next(State::Done)));
        assert_eq!(fsm.order.order_id, Some(999));
        let record = fsm.success_record();
        assert_eq!(record.order_id, Some(999));
    }

    /// S6 — 412 ban during polling: ProjectInfo's underlying call is banned;
    /// WaitForStock treats it as a transport failure and loops without a
    /// state change (`available` stays false).
    #[tokio::test]
    async fn s6_banned_poll_is_treated_as_no_stock_not_a_crash() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ticket/project/getV2"))
            .respond_with(ResponseTemplate::new(412))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;
        fsm.schedule.mark_create_attempt(schedule::now_unix());
        let outcome = fsm.action_wait_for_stock().await;
        assert!(matches!(outcome, Outcome::Next(State::WaitForStock)));
    }

    /// S1 (happy path, pre-opening) exercises a real countdown sleeping
    /// through `Hours`/`TensOfMinutes`/`Minutes`/`PreWarm`/`FinalMinute`
    /// tiers, which this crate drives off wall-clock `SystemTime` rather
    /// than an injectable clock — `classify_countdown`'s tier boundaries are
    /// covered directly in `schedule.rs`'s own tests instead. What's tested
    /// here is `WaitForSale`'s terminal decision once the countdown has
    /// already elapsed: the sale is open, no pre-warm occurred, so the run
    /// must route through `QueryToken` rather than assuming a token.
    #[tokio::test]
    async fn s1_sale_already_open_without_prewarm_routes_through_query_token() {
        let mock = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/ticket/project/getV2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "code": 0, "msg": "ok",
                "data": {
                    "express": false,
                    "screen_list": [{
                        "id": 1, "express_fee": 0,
                        "ticket_list": [{
                            "id": 1, "price": 19900, "saleStart": schedule::now_unix() - 5,
                            "clickable": true, "sale_flag": 2, "num": 3
                        }]
                    }]
                }
            })))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;
        fsm.query_cache = false;

        let outcome = fsm.action_wait_for_sale().await;
        assert!(matches!(outcome, Outcome::Next(State::QueryToken)));
        assert!(!fsm.skip_token);
    }

    /// Invariant 2: `risked` is cleared as soon as the next Prepare completes.
    #[tokio::test]
    async fn risked_flag_clears_after_the_following_prepare() {
        let mock = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/ticket/order/prepare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": 0, "msg": "ok", "data": {"token": "T2"}})))
            .mount(&mock)
            .await;

        let mut fsm = fsm_against(&mock).await;
        fsm.order.risked = true;
        fsm.order.token = Some("RISK-TOKEN".to_string());

        let code = fsm.do_prepare().await;
        assert!(code.is_success());
        assert!(!fsm.order.risked);
    }
}
