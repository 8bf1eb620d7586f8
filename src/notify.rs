//! Notification fan-out (C6, SPEC_FULL.md §4.6).
//!
//! On reaching `Done`, the FSM hands a [`SuccessRecord`] here and one
//! independent task is spawned per enabled channel. Workers share nothing
//! and may outlive the main loop (§5 "Shared resources"). Grounded in
//! `original_source/util/Notice/__init__.py` and `util/push/push.py` — the
//! full channel set the distilled spec's §6 config fields name but never
//! design.

use crate::config::NotifyConfig;
use crate::core_types::OrderId;
use crate::error::NotifyError;
use lettre::message::Message;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use tracing::{error, info, warn};

/// Immutable record the terminal state reads after acquisition finishes
/// (§3 "Ownership": "the only concurrency is the post-success notification
/// fan-out, which reads an immutable success record").
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub order_id: Option<OrderId>,
    pub title: String,
    pub message: String,
}

impl SuccessRecord {
    pub fn for_order(order_id: OrderId) -> Self {
        SuccessRecord {
            order_id: Some(order_id),
            title: "Ticket secured".to_string(),
            message: format!("Order {order_id} locked — pay before it expires."),
        }
    }
}

/// Fans success notifications out to every enabled channel, one
/// `tokio::spawn`ed task per channel. Returns immediately; callers that want
/// to wait for delivery can `.await` the returned handles, but per §5 either
/// behavior ("wait for them to settle or simply exit") is acceptable.
pub fn fan_out(config: &NotifyConfig, record: &SuccessRecord, http: reqwest::Client) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    if config.system {
        let record = record.clone();
        handles.push(tokio::spawn(async move {
            notify_system(&record);
        }));
    }

    if config.sound {
        handles.push(tokio::spawn(async move {
            notify_sound();
        }));
    }

    if let Some(token) = config.pushplus.clone() {
        let record = record.clone();
        let client = http.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = push_pushplus(&client, &token, &record).await {
                error!(error = %e, "pushplus notification failed");
            }
        }));
    }

    if let Some(token) = config.bark.clone() {
        let record = record.clone();
        let client = http.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = push_bark(&client, &token, &record).await {
                error!(error = %e, "bark notification failed");
            }
        }));
    }

    if let Some(token) = config.dingding.clone() {
        let record = record.clone();
        let client = http.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = push_dingtalk(&client, &token, &record).await {
                error!(error = %e, "dingtalk notification failed");
            }
        }));
    }

    if let Some(token) = config.wx.clone() {
        let record = record.clone();
        let client = http.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = push_wecom(&client, &token, &record).await {
                error!(error = %e, "wecom notification failed");
            }
        }));
    }

    if let Some(token) = config.ftqq.clone() {
        let record = record.clone();
        let client = http.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = push_ftqq(&client, &token, &record).await {
                error!(error = %e, "server酱 notification failed");
            }
        }));
    }

    if let Some(smtp) = config.mail.clone() {
        let record = record.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = send_mail(&smtp, &record).await {
                error!(error = %e, "smtp notification failed");
            }
        }));
    }

    handles
}

/// Desktop notification stand-in: no crate in the retrieval pack provides
/// platform toast notifications, so this is a loud log line plus a terminal
/// bell — the proportionate, dependency-free rendering of "notify the
/// operator locally" (SPEC_FULL.md §4.6).
fn notify_system(record: &SuccessRecord) {
    info!(title = %record.title, message = %record.message, "\u{2714} {}", record.title);
    print!("\x07");
}

fn notify_sound() {
    for _ in 0..3 {
        print!("\x07");
    }
    warn!("sound channel enabled but no audio backend is configured in this build");
}

async fn push_pushplus(client: &reqwest::Client, token: &str, record: &SuccessRecord) -> Result<(), NotifyError> {
    let url = "http://www.pushplus.plus/send";
    let body = serde_json::json!({
        "token": token,
        "title": record.title,
        "content": record.message,
        "template": "html",
        "channel": "wechat",
    });
    client.post(url).json(&body).send().await?;
    Ok(())
}

async fn push_bark(client: &reqwest::Client, token: &str, record: &SuccessRecord) -> Result<(), NotifyError> {
    let url = format!("https://api.day.app/{token}");
    let body = serde_json::json!({
        "title": record.title,
        "body": record.message,
        "level": "timeSensitive",
        "badge": 1,
        "group": "ticket-sentinel",
        "isArchive": 1,
    });
    client.post(&url).json(&body).send().await?;
    Ok(())
}

async fn push_dingtalk(client: &reqwest::Client, token: &str, record: &SuccessRecord) -> Result<(), NotifyError> {
    let url = format!("https://oapi.dingtalk.com/robot/send?access_token={token}");
    let body = serde_json::json!({
        "msgtype": "text",
        "text": { "content": format!("{}: {}", record.title, record.message) },
        "at": { "isAtAll": false },
    });
    client.post(&url).json(&body).send().await?;
    Ok(())
}

async fn push_wecom(client: &reqwest::Client, token: &str, record: &SuccessRecord) -> Result<(), NotifyError> {
    let url = format!("https://qyapi.weixin.qq.com/cgi-bin/webhook/send?key={token}");
    let body = serde_json::json!({
        "msgtype": "text",
        "text": { "content": format!("{}: {}", record.title, record.message) },
    });
    client.post(&url).json(&body).send().await?;
    Ok(())
}

async fn push_ftqq(client: &reqwest::Client, token: &str, record: &SuccessRecord) -> Result<(), NotifyError> {
    let url = format!("https://sctapi.ftqq.com/{token}.send");
    let body = serde_json::json!({
        "title": record.title,
        "desp": record.message,
        "noip": 1,
    });
    client.post(&url).form(&body).send().await?;
    Ok(())
}

async fn send_mail(smtp: &crate::config::SmtpConfig, record: &SuccessRecord) -> Result<(), NotifyError> {
    let mut builder = Message::builder()
        .from(smtp.sender.parse().map_err(|e| NotifyError::Smtp(format!("bad sender address: {e}")))?)
        .subject(record.title.clone());

    for receiver in &smtp.receivers {
        let mailbox = receiver.parse().map_err(|e| NotifyError::Smtp(format!("bad receiver address: {e}")))?;
        builder = builder.to(mailbox);
    }

    let email = builder
        .body(record.message.clone())
        .map_err(|e| NotifyError::Smtp(e.to_string()))?;

    let creds = Credentials::new(smtp.user.clone(), smtp.pass.clone());
    let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        .map_err(|e| NotifyError::Smtp(e.to_string()))?
        .port(smtp.port)
        .credentials(creds)
        .build();

    transport.send(email).await.map_err(|e| NotifyError::Smtp(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_record_for_order_carries_order_id() {
        let record = SuccessRecord::for_order(999);
        assert_eq!(record.order_id, Some(999));
        assert!(record.message.contains("999"));
    }
}
