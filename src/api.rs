//! Vendor API adapter.
//!
//! Typed wrappers over the seven endpoints the FSM calls, each returning a
//! `(VendorCode, msg, ...)` tuple the FSM matches on directly — vendor codes
//! are data, never converted into a Rust `Error`.

use crate::config::{DeliveryAddress, TargetSpec};
use crate::core_types::{Fen, OrderId, VendorCode};
use crate::http::HttpClient;
use rand::Rng;
use serde_json::json;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const SHOW_HOST: &str = "https://show.bilibili.com";
const API_HOST: &str = "https://api.bilibili.com";

/// Challenge type discriminator returned by `RiskRegister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Geetest,
    Phone,
    Sms,
    Biliword,
    Unknown,
}

impl ChallengeType {
    fn from_wire(s: &str) -> Self {
        match s {
            "geetest" => ChallengeType::Geetest,
            "phone" => ChallengeType::Phone,
            "sms" => ChallengeType::Sms,
            "biliword" => ChallengeType::Biliword,
            _ => ChallengeType::Unknown,
        }
    }
}

/// Populated when `Prepare` returns the challenge-required envelope.
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    pub mid: Option<i64>,
    pub buvid: Option<String>,
    pub ip: Option<String>,
    pub scene: Option<String>,
    pub ua: Option<String>,
    pub voucher: Option<String>,
    pub decision_type: Option<i64>,
    pub challenge: Option<String>,
    pub gt: Option<String>,
    pub challenge_type: Option<ChallengeType>,
}

/// Per-SKU entry inside a session's ticket list.
#[derive(Debug, Clone)]
pub struct SkuSnapshot {
    pub id: u64,
    pub price: Fen,
    pub sale_start: i64,
    pub clickable: bool,
    pub sale_flag: i64,
    pub remaining_count: i64,
}

#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: u64,
    pub delivery_fee: Fen,
    pub skus: Vec<SkuSnapshot>,
}

/// Refreshed on demand from the project-info endpoint. Remembers
/// `(session_index, sku_index)` so subsequent reads of the target SKU are
/// O(1) until the vendor reorders the arrays, at which point a linear
/// search repairs the cache (mirrors the vendor's own `QueryAmount` logic).
#[derive(Debug, Clone, Default)]
pub struct ProjectSnapshot {
    pub sale_start: i64,
    pub requires_paper_delivery: bool,
    pub sessions: Vec<SessionSnapshot>,
    cached_path: Option<(usize, usize)>,
}

impl ProjectSnapshot {
    /// Locates `(session_id, sku_id)`, trying the cached path first and
    /// falling back to a linear search that also repairs the cache
    /// (Testable Property: "Cache-location seeding ... linear-search
    /// fallback must trigger").
    pub fn locate(&mut self, session_id: u64, sku_id: u64) -> Option<(&SessionSnapshot, &SkuSnapshot)> {
        if let Some((si, ki)) = self.cached_path {
            if let Some(session) = self.sessions.get(si) {
                if session.id == session_id {
                    if let Some(sku) = session.skus.get(ki) {
                        if sku.id == sku_id {
                            return self.sessions.get(si).and_then(|s| s.skus.get(ki).map(|k| (s, k)));
                        }
                    }
                }
            }
        }

        for (si, session) in self.sessions.iter().enumerate() {
            if session.id != session_id {
                continue;
            }
            for (ki, sku) in session.skus.iter().enumerate() {
                if sku.id == sku_id {
                    self.cached_path = Some((si, ki));
                    return self.sessions.get(si).and_then(|s| s.skus.get(ki).map(|k| (s, k)));
                }
            }
        }
        None
    }
}

/// Populated incrementally by the FSM as the order flow progresses
/// (SPEC_FULL.md §3 "OrderContext").
#[derive(Debug, Clone, Default)]
pub struct OrderContext {
    pub token: Option<String>,
    pub order_id: Option<OrderId>,
    pub order_token: Option<String>,
    pub pay_money: Fen,
    /// `true` immediately after a successful challenge, so the next
    /// `Prepare` carries the gaia token; cleared once that `Prepare`
    /// completes (Invariant 2).
    pub risked: bool,
    pub contact_saved: bool,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

/// Stateless typed wrapper over the vendor's seven HTTP endpoints. All
/// mutable acquisition state (`OrderContext`, `RiskContext`,
/// `ProjectSnapshot`) lives in the FSM and is passed in by reference — the
/// adapter itself holds only the immutable `TargetSpec` and the shared
/// `HttpClient` (SPEC_FULL.md §3 "Ownership").
#[derive(Debug, Clone)]
pub struct VendorClient {
    http: HttpClient,
    target: TargetSpec,
    debug: bool,
    show_host: String,
    api_host: String,
}

impl VendorClient {
    pub fn new(http: HttpClient, target: TargetSpec, debug: bool) -> Self {
        VendorClient {
            http,
            target,
            debug,
            show_host: SHOW_HOST.to_string(),
            api_host: API_HOST.to_string(),
        }
    }

    /// Points the adapter at a different pair of hosts — used to aim it at a
    /// `wiremock::MockServer` in tests instead of the live vendor.
    #[cfg(test)]
    pub(crate) fn with_hosts(http: HttpClient, target: TargetSpec, debug: bool, show_host: String, api_host: String) -> Self {
        VendorClient { http, target, debug, show_host, api_host }
    }

    #[cfg(test)]
    pub(crate) fn http_cookie(&self, name: &str) -> Option<String> {
        self.http.cookie(name)
    }

    /// 1. `ProjectInfo` — `GET project/getV2?id={projectId}`.
    pub async fn project_info(&self, scene: &str) -> (VendorCode, String, Option<ProjectSnapshot>) {
        let url = format!("{}/api/ticket/project/getV2", self.show_host);
        let params = [
            ("version", "134".to_string()),
            ("id", self.target.project_id.to_string()),
            ("project_id", self.target.project_id.to_string()),
            ("requestSource", scene.to_string()),
        ];
        let env = self.http.get(&url, &params, self.debug).await;
        if !env.code.is_success() {
            return (env.code, env.msg, None);
        }

        let mut snapshot = ProjectSnapshot {
            requires_paper_delivery: env
                .data_field("express")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            ..Default::default()
        };

        let Some(screens) = env.data_field("screen_list").and_then(|v| v.as_array()) else {
            return (VendorCode::TRANSPORT_ERROR, "missing screen_list".to_string(), None);
        };

        for screen in screens {
            let Some(session_id) = screen.get("id").and_then(|v| v.as_u64()) else {
                continue;
            };
            let delivery_fee = screen
                .get("express_fee")
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            let mut skus = Vec::new();
            if let Some(tickets) = screen.get("ticket_list").and_then(|v| v.as_array()) {
                for sku in tickets {
                    let Some(sku_id) = sku.get("id").and_then(|v| v.as_u64()) else {
                        continue;
                    };
                    skus.push(SkuSnapshot {
                        id: sku_id,
                        price: Fen(sku.get("price").and_then(|v| v.as_u64()).unwrap_or(0)),
                        sale_start: sku.get("saleStart").and_then(|v| v.as_i64()).unwrap_or(0),
                        clickable: sku.get("clickable").and_then(|v| v.as_bool()).unwrap_or(false),
                        sale_flag: sku.get("sale_flag").and_then(|v| v.as_i64()).unwrap_or(0),
                        remaining_count: sku.get("num").and_then(|v| v.as_i64()).unwrap_or(0),
                    });
                }
            }
            snapshot.sessions.push(SessionSnapshot {
                id: session_id,
                delivery_fee: Fen(delivery_fee),
                skus,
            });
        }

        if let Some(sale_start) = snapshot
            .locate(self.target.session_id, self.target.sku_id)
            .map(|(_, sku)| sku.sale_start)
        {
            snapshot.sale_start = sale_start;
        }

        (VendorCode::SUCCESS, env.msg, Some(snapshot))
    }

    /// 2. `Prepare` (`QueryToken`) — `POST order/prepare?project_id=…`.
    pub async fn prepare(
        &self,
        scene: &str,
        order: &OrderContext,
    ) -> (VendorCode, String, Option<String>, Option<RiskContext>) {
        let mut url = format!(
            "{}/api/ticket/order/prepare?project_id={}",
            self.show_host, self.target.project_id
        );
        if order.risked {
            if let Some(token) = &order.token {
                url.push_str(&format!("&token={token}&gaia_vtoken={token}"));
            }
        }

        let params = [
            ("project_id", self.target.project_id.to_string()),
            ("screen_id", self.target.session_id.to_string()),
            ("sku_id", self.target.sku_id.to_string()),
            ("count", self.target.count.to_string()),
            ("order_type", self.target.order_type.to_string()),
            ("token", String::new()),
            ("requestSource", scene.to_string()),
            ("newRisk", "true".to_string()),
        ];
        let env = self.http.post_form(&url, &params, self.debug).await;

        match env.code.0 {
            0 => {
                let token = env.data_field("token").and_then(|v| v.as_str()).map(|s| s.to_string());
                (VendorCode::SUCCESS, env.msg, token, None)
            }
            -401 => {
                let risk = env
                    .data_field("ga_data")
                    .and_then(|v| v.get("riskParams"))
                    .map(|p| RiskContext {
                        mid: p.get("mid").and_then(|v| v.as_i64()),
                        buvid: p.get("buvid").and_then(|v| v.as_str()).map(str::to_string),
                        ip: p.get("ip").and_then(|v| v.as_str()).map(str::to_string),
                        scene: p.get("scene").and_then(|v| v.as_str()).map(str::to_string),
                        ua: p.get("ua").and_then(|v| v.as_str()).map(str::to_string),
                        voucher: p.get("v_voucher").and_then(|v| v.as_str()).map(str::to_string),
                        decision_type: p.get("decision_type").and_then(|v| v.as_i64()),
                        challenge: None,
                        gt: None,
                        challenge_type: None,
                    });
                (VendorCode::RISK_REQUIRED, env.msg, None, risk)
            }
            _ => (env.code, env.msg, None, None),
        }
    }

    /// 3. `RiskRegister` — `POST gaia-vgate/v1/register`.
    pub async fn risk_register(&self, risk: &RiskContext) -> (VendorCode, String, Option<String>, Option<RiskContext>) {
        let csrf = self.http.csrf_token().unwrap_or_default();
        let url = format!("{}/x/gaia-vgate/v1/register", self.api_host);
        let params = [
            ("buvid", risk.buvid.clone().unwrap_or_default()),
            ("csrf", csrf),
            ("decision_type", risk.decision_type.map(|v| v.to_string()).unwrap_or_default()),
            ("ip", risk.ip.clone().unwrap_or_default()),
            ("mid", risk.mid.map(|v| v.to_string()).unwrap_or_default()),
            ("origin_scene", risk.scene.clone().unwrap_or_default()),
            ("scene", risk.scene.clone().unwrap_or_default()),
            ("ua", risk.ua.clone().unwrap_or_default()),
            ("v_voucher", risk.voucher.clone().unwrap_or_default()),
        ];
        let env = self.http.post_form(&url, &params, self.debug).await;

        match env.code.0 {
            0 => {
                let token = env.data_field("token").and_then(|v| v.as_str()).map(str::to_string);
                let mut updated = risk.clone();

                if let Some(gt_block) = env.data_field("geetest") {
                    updated.challenge = gt_block.get("challenge").and_then(|v| v.as_str()).map(str::to_string);
                    updated.gt = gt_block.get("gt").and_then(|v| v.as_str()).map(str::to_string);
                    updated.challenge_type = Some(ChallengeType::Geetest);
                } else if let Some(phone_value) = env.data_field("telephone").or_else(|| env.data_field("phone")) {
                    updated.challenge = phone_value.as_str().map(str::to_string);
                    updated.challenge_type = Some(ChallengeType::Phone);
                } else {
                    let wire_type = env.data_field("type").and_then(|v| v.as_str()).unwrap_or("unknown");
                    updated.challenge_type = Some(ChallengeType::from_wire(wire_type));
                }

                (VendorCode::SUCCESS, env.msg, token, Some(updated))
            }
            100_000 => {
                info!("risk register: already solved elsewhere, treating as no-op success");
                (VendorCode::SUCCESS, env.msg, None, None)
            }
            _ => (env.code, env.msg, None, None),
        }
    }

    /// 4. `RiskValidate` — `GET gaia-vgate/v1/validate`.
    pub async fn risk_validate_geetest(&self, risk: &RiskContext, token: &str, validate: &str) -> (VendorCode, String) {
        let csrf = self.http.csrf_token().unwrap_or_default();
        let url = format!("{}/x/gaia-vgate/v1/validate", self.api_host);
        let params = [
            ("challenge", risk.challenge.clone().unwrap_or_default()),
            ("csrf", csrf),
            ("seccode", format!("{validate}|jordan")),
            ("token", token.to_string()),
            ("validate", validate.to_string()),
        ];
        self.finish_risk_validate(&url, &params, token).await
    }

    pub async fn risk_validate_phone(&self, token: &str) -> (VendorCode, String) {
        if self.target.phone.is_empty() {
            return (VendorCode(114_514), "phone challenge requires a configured phone".to_string());
        }
        let csrf = self.http.csrf_token().unwrap_or_default();
        let url = format!("{}/x/gaia-vgate/v1/validate", self.api_host);
        let params = [
            ("code", self.target.phone.clone()),
            ("csrf", csrf),
            ("token", token.to_string()),
        ];
        self.finish_risk_validate(&url, &params, token).await
    }

    async fn finish_risk_validate(&self, url: &str, params: &[(&str, String)], token: &str) -> (VendorCode, String) {
        let env = self.http.get(url, params, self.debug).await;
        let is_valid = env.data_field("is_valid").and_then(|v| v.as_i64()).unwrap_or(0);
        if env.code.is_success() && is_valid == 1 {
            self.http.set_gaia_vtoken(token);
            (VendorCode::SUCCESS, env.msg)
        } else {
            warn!(code = env.code.0, msg = %env.msg, "risk validate failed");
            (if env.code.is_success() { VendorCode(114_514) } else { env.code }, env.msg)
        }
    }

    /// 5. `CreateOrder` — `POST order/createV2?project_id=…`.
    pub async fn create_order(
        &self,
        scene: &str,
        order: &OrderContext,
        delivery: Option<&DeliveryAddress>,
    ) -> (VendorCode, String, Option<CreateOrderEffect>) {
        let url = format!(
            "{}/api/ticket/order/createV2?project_id={}",
            self.show_host, self.target.project_id
        );
        let timestamp = now_millis();
        let mut rng = rand::thread_rng();
        let click_position = json!({
            "x": rng.gen_range(1300..=1500),
            "y": rng.gen_range(20..=100),
            "origin": timestamp - rng.gen_range(2500..=10000),
            "now": timestamp,
        });
        let device_id = hex::encode(rand::random::<[u8; 8]>());
        let buyer_info = serde_json::to_string(&self.target.attendees).unwrap_or_default();

        let mut params = vec![
            ("project_id", self.target.project_id.to_string()),
            ("screen_id", self.target.session_id.to_string()),
            ("sku_id", self.target.sku_id.to_string()),
            ("count", self.target.count.to_string()),
            ("pay_money", order.pay_money.0.to_string()),
            ("order_type", self.target.order_type.to_string()),
            ("timestamp", timestamp.to_string()),
            ("buyer_info", buyer_info),
            ("token", order.token.clone().unwrap_or_default()),
            ("deviceId", device_id),
            ("clickPosition", click_position.to_string()),
            ("newRisk", "true".to_string()),
            ("requestSource", scene.to_string()),
        ];

        if let Some(addr) = delivery {
            params.push(("deliver_info", serde_json::to_string(addr).unwrap_or_default()));
            params.push(("buyer", self.target.username.clone()));
            params.push(("tel", self.target.phone.clone()));
        }

        let env = self.http.post_form(&url, &params, self.debug).await;

        match env.code.0 {
            0 => {
                let order_id = env.data_field("orderId").and_then(|v| v.as_u64());
                let order_token = env.data_field("token").and_then(|v| v.as_str()).map(str::to_string);
                (VendorCode::SUCCESS, env.msg, Some(CreateOrderEffect::Created { order_id, order_token }))
            }
            100_034 => {
                let pay_money = env.data_field("pay_money").and_then(|v| v.as_u64()).map(Fen);
                (env.code, env.msg, Some(CreateOrderEffect::PriceDrift { pay_money }))
            }
            209_001 => {
                self.save_contact_info().await;
                (env.code, env.msg, Some(CreateOrderEffect::ContactSaved))
            }
            code if VendorCode(code).is_duplicate_unpaid() => {
                // An unpaid order from an earlier attempt already exists; surface
                // its id so the FSM's Done transition still has something to
                // notify about (S5: "notifications reference order 999").
                let order_id = env.data_field("orderId").and_then(|v| v.as_u64());
                (env.code, env.msg, Some(CreateOrderEffect::Created { order_id, order_token: None }))
            }
            _ => (env.code, env.msg, None),
        }
    }

    /// `POST buyer/saveContactInfo` — self-heal for code `209001`.
    async fn save_contact_info(&self) {
        let url = format!("{}/api/ticket/buyer/saveContactInfo", self.show_host);
        let params = [
            ("username", self.target.username.clone()),
            ("tel", self.target.phone.clone()),
        ];
        let _ = self.http.post_form(&url, &params, self.debug).await;
    }

    /// 6. `CreateOrderStatus` — `GET order/createstatus?token=…&orderId=…`.
    pub async fn create_order_status(&self, order_token: &str, order_id: OrderId) -> (VendorCode, String) {
        let url = format!(
            "{}/api/ticket/order/createstatus?token={order_token}&project_id={}&orderId={order_id}",
            self.show_host, self.target.project_id
        );
        let env = self.http.get(&url, &[], self.debug).await;

        if env.code.0 == 100_012 {
            let echoed_order_id = env.data_field("order_id").and_then(|v| v.as_u64());
            if echoed_order_id == Some(order_id) {
                return (VendorCode::SUCCESS, env.msg);
            }
        }
        (env.code, env.msg)
    }

    /// 7. `OrderInfo` — `GET order/info?order_id=…`.
    pub async fn order_info(&self, order_id: OrderId) -> (VendorCode, String) {
        let url = format!("{}/api/ticket/order/info?order_id={order_id}", self.show_host);
        let env = self.http.get(&url, &[], self.debug).await;
        (env.code, env.msg)
    }
}

/// Side effects `CreateOrder` can have on `OrderContext`, besides the plain
/// code (SPEC_FULL.md §4.2 point 5: "two in-line mutations of adapter
/// state").
#[derive(Debug, Clone)]
pub enum CreateOrderEffect {
    Created { order_id: Option<OrderId>, order_token: Option<String> },
    PriceDrift { pay_money: Option<Fen> },
    ContactSaved,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sku(id: u64, price: u64) -> SkuSnapshot {
        SkuSnapshot {
            id,
            price: Fen(price),
            sale_start: 0,
            clickable: true,
            sale_flag: 2,
            remaining_count: 5,
        }
    }

    #[test]
    fn locate_finds_target_via_linear_search_first_time() {
        let mut snapshot = ProjectSnapshot {
            sessions: vec![SessionSnapshot { id: 1, delivery_fee: Fen(0), skus: vec![sku(7, 100)] }],
            ..Default::default()
        };
        let (_, found) = snapshot.locate(1, 7).unwrap();
        assert_eq!(found.price, Fen(100));
    }

    #[test]
    fn locate_survives_reordering_via_fallback() {
        let mut snapshot = ProjectSnapshot {
            sessions: vec![
                SessionSnapshot { id: 1, delivery_fee: Fen(0), skus: vec![sku(7, 100)] },
            ],
            ..Default::default()
        };
        snapshot.locate(1, 7).unwrap();

        // Simulate the vendor reordering both arrays between calls.
        snapshot.sessions = vec![
            SessionSnapshot { id: 2, delivery_fee: Fen(0), skus: vec![sku(9, 200)] },
            SessionSnapshot { id: 1, delivery_fee: Fen(0), skus: vec![sku(3, 50), sku(7, 150)] },
        ];

        let (_, found) = snapshot.locate(1, 7).expect("must still find target after reorder");
        assert_eq!(found.price, Fen(150));
    }

    #[test]
    fn locate_returns_none_when_absent() {
        let mut snapshot = ProjectSnapshot::default();
        assert!(snapshot.locate(1, 1).is_none());
    }
}
