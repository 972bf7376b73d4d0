//! Errors - エラーの運用分類
//!
//! 各 port のエラー型は `kind()` で ErrorKind を返す。
//! loop 側はこの分類だけを見て「捨てる / ack しないで再配送に任せる / 起動を止める」を決める。
//! カテゴリ欠落（partial data）はエラーではないので、ここには含めない。

use std::fmt;

/// ErrorKind は実行エラーの分類
///
/// - Transient: provider / cache / queue の一時的な障害。queue の再配送で回復する
/// - Malformed: デコードできないメッセージ。捨てるが、visibility timeout 後に再配送されうる
/// - Fatal: 起動時に cache / queue へ到達できない。プロセスを起動しない
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    Malformed,
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Fatal => "fatal",
        };
        f.write_str(s)
    }
}
