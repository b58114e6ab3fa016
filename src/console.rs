// 控制台交互模块
//
// 编排逻辑只通过 Console 输出提示和读取输入，测试时可替换为脚本化实现。

use crate::error::AppResult;
use std::io::{self, BufRead, Write};

/// 消息级别，决定控制台前缀符号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Success,
    Warn,
    Error,
}

impl Level {
    fn symbol(&self) -> &'static str {
        match self {
            Level::Info => "ℹ",
            Level::Success => "✓",
            Level::Warn => "⚠",
            Level::Error => "✗",
        }
    }
}

pub trait Console {
    /// 输出一条面向用户的消息
    fn report(&mut self, level: Level, message: &str);

    /// 输出无前缀的原始文本（横幅、表格）
    fn print(&mut self, text: &str);

    /// 提示并读取一行输入，已去除首尾空白；输入流结束时返回 None
    fn ask(&mut self, question: &str) -> AppResult<Option<String>>;

    fn info(&mut self, message: &str) {
        self.report(Level::Info, message);
    }

    fn success(&mut self, message: &str) {
        self.report(Level::Success, message);
    }

    fn warn(&mut self, message: &str) {
        self.report(Level::Warn, message);
    }

    fn error(&mut self, message: &str) {
        self.report(Level::Error, message);
    }

    /// y/n 确认，只有明确输入 y 才返回 true
    fn confirm(&mut self, question: &str) -> AppResult<bool> {
        let answer = self.ask(&format!("{} (y/n): ", question))?;
        Ok(matches!(answer.as_deref(), Some(a) if a.eq_ignore_ascii_case("y")))
    }
}

/// 分隔线
pub fn rule() -> String {
    "═".repeat(80)
}

/// 标准输入输出实现
#[derive(Debug, Default)]
pub struct TerminalConsole;

impl Console for TerminalConsole {
    fn report(&mut self, level: Level, message: &str) {
        println!("{} {}", level.symbol(), message);
    }

    fn print(&mut self, text: &str) {
        println!("{}", text);
    }

    fn ask(&mut self, question: &str) -> AppResult<Option<String>> {
        print!("{}", question);
        io::stdout().flush()?;

        let mut line = String::new();
        let read = io::stdin().lock().read_line(&mut line)?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// 测试用的脚本化控制台：按顺序返回预设答案并记录所有输出
#[cfg(test)]
#[derive(Debug, Default)]
pub struct ScriptedConsole {
    pub answers: std::collections::VecDeque<String>,
    pub messages: Vec<(Level, String)>,
    pub printed: Vec<String>,
    pub questions: Vec<String>,
}

#[cfg(test)]
impl ScriptedConsole {
    pub fn with_answers(answers: &[&str]) -> Self {
        Self {
            answers: answers.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn has_message(&self, level: Level, needle: &str) -> bool {
        self.messages.iter().any(|(l, m)| *l == level && m.contains(needle))
    }
}

#[cfg(test)]
impl Console for ScriptedConsole {
    fn report(&mut self, level: Level, message: &str) {
        self.messages.push((level, message.to_string()));
    }

    fn print(&mut self, text: &str) {
        self.printed.push(text.to_string());
    }

    fn ask(&mut self, question: &str) -> AppResult<Option<String>> {
        self.questions.push(question.to_string());
        Ok(self.answers.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirm_requires_explicit_yes() {
        let mut console = ScriptedConsole::with_answers(&["Y", "n", "yes", ""]);
        assert!(console.confirm("重新下载?").unwrap());
        assert!(!console.confirm("重新下载?").unwrap());
        assert!(!console.confirm("重新下载?").unwrap());
        assert!(!console.confirm("重新下载?").unwrap());
        // 输入流结束
        assert!(!console.confirm("重新下载?").unwrap());
        assert_eq!(console.questions[0], "重新下载? (y/n): ");
    }
}
