use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

/// 使用済みTOTPコードの保持期間（既定値）
///
/// TOTPの許容ウィンドウ（±60秒）より十分長く取り、
/// 理論上の有効期間が尽きた後も余裕をもってリプレイを拒否する。
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// 使用済みTOTPコードガード
///
/// 一度受理したコードを保持期間だけ記録し、有効期間内の
/// 再利用（リプレイ攻撃）を拒否する。各エントリは mark_used 時に
/// 起動する遅延削除タスクで自動的に失効する（定期スイープなし）。
///
/// # Note
/// キーは6桁コードの値そのもので、シークレットやセッションには
/// 紐付かない。異なるユーザーのコードが同一期間内に偶然一致すると
/// 互いにブロックし合う。元実装から引き継いだ既知の制限であり、
/// 仕様が改訂されるまでこの挙動を維持する。
#[derive(Clone)]
pub struct ReplayGuard {
    used_tokens: Arc<Mutex<HashSet<String>>>,
    ttl: Duration,
}

impl ReplayGuard {
    /// 保持期間を指定して作成
    pub fn new(ttl: Duration) -> Self {
        Self {
            used_tokens: Arc::new(Mutex::new(HashSet::new())),
            ttl,
        }
    }

    /// コードが使用済みかどうか
    pub async fn is_used(&self, token: &str) -> bool {
        self.used_tokens.lock().await.contains(token)
    }

    /// コードを使用済みとして記録し、保持期間後に自動削除する
    ///
    /// 戻り値は「このコードを新規に記録したか」。判定と記録を単一の
    /// ロック取得で行うため、同一コードを持つ並行呼び出しのうち
    /// true を受け取るのは一つだけ。受理可否はこの戻り値で判断する
    /// （is_used → mark_used の二段呼び出しでは隙間ができる）。
    pub async fn mark_used(&self, token: &str) -> bool {
        let inserted = self.used_tokens.lock().await.insert(token.to_string());
        if !inserted {
            return false;
        }

        let used_tokens = Arc::clone(&self.used_tokens);
        let ttl = self.ttl;
        let token = token.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            used_tokens.lock().await.remove(&token);
        });

        true
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
