//! デバッガコマンド

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// ブレークポイントを設定
    Break(String),
    /// ブレークポイントを削除
    Delete(usize),
    /// ブレークポイント一覧表示
    Breakpoints,
    /// 実行継続
    Continue,
    /// 1命令ステップ実行
    Step,
    /// 現在フレームの変数一覧表示
    Vars,
    /// 変数のツリー表示
    Print(String),
    /// シンボル検索
    Find(String),
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.trim().split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        match parts[0] {
            "break" | "b" => {
                if parts.len() > 1 {
                    Some(Command::Break(parts[1..].join(" ")))
                } else {
                    None
                }
            }
            "delete" | "d" => parts.get(1)?.parse().ok().map(Command::Delete),
            "breakpoints" | "bl" => Some(Command::Breakpoints),
            "continue" | "c" => Some(Command::Continue),
            "step" | "s" => Some(Command::Step),
            "vars" | "v" | "locals" => Some(Command::Vars),
            "print" | "p" => {
                if parts.len() > 1 {
                    Some(Command::Print(parts[1..].join(" ")))
                } else {
                    None
                }
            }
            "find" => {
                if parts.len() > 1 {
                    Some(Command::Find(parts[1..].join(" ")))
                } else {
                    None
                }
            }
            "help" | "h" | "?" => Some(Command::Help),
            "quit" | "q" | "exit" => Some(Command::Quit),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("continue"), Some(Command::Continue));
        assert_eq!(Command::parse("c"), Some(Command::Continue));
        assert_eq!(Command::parse("vars"), Some(Command::Vars));
        assert_eq!(
            Command::parse("break main"),
            Some(Command::Break("main".to_string()))
        );
        assert_eq!(
            Command::parse("print list"),
            Some(Command::Print("list".to_string()))
        );
        assert_eq!(Command::parse("delete 2"), Some(Command::Delete(2)));
        assert_eq!(Command::parse("breakpoints"), Some(Command::Breakpoints));
        assert_eq!(Command::parse("quit"), Some(Command::Quit));
    }

    #[test]
    fn test_parse_rejects_incomplete_commands() {
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse("break"), None);
        assert_eq!(Command::parse("delete"), None);
        assert_eq!(Command::parse("delete two"), None);
        assert_eq!(Command::parse("print"), None);
        assert_eq!(Command::parse("unknown"), None);
    }
}
