//! Signature-script evaluator
//!
//! Scripts are sequences of [`Token`]s: either an [`Opcode`] or a literal operand.
//! Evaluation runs the tokens on a single value stack. Literals are pushed, opcodes
//! dispatch through one exhaustive `match`. A script succeeds when it leaves exactly
//! one truthy value on the stack.

use crate::constants::*;
use crate::crypto::{address_of, double_hash, verify};
use crate::error::{LedgerError, Result};
use crate::types::*;

/// Operations understood by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// a b -> a+b
    Add,
    /// a b -> a-b
    Minus,
    /// a b -> a*b
    Mul,
    /// a b -> (fails unless a == b)
    EqualVerify,
    /// a b -> a == b
    Equal,
    /// sig pk -> verify(pk, sig, message)
    CheckSig,
    /// pk -> address_of(pk)
    Addr,
    /// x -> x x
    Dup,
    /// x1..xn n -> x1..xn x1..xn n
    NDup,
    /// sig1..sigm m pk1..pkn n -> bool
    CheckMulSig,
    /// pk1..pkn n -> double_hash(pk1 || .. || pkn)
    MulHash,
}

impl Opcode {
    pub const ALL: [Opcode; 11] = [
        Opcode::Add,
        Opcode::Minus,
        Opcode::Mul,
        Opcode::EqualVerify,
        Opcode::Equal,
        Opcode::CheckSig,
        Opcode::Addr,
        Opcode::Dup,
        Opcode::NDup,
        Opcode::CheckMulSig,
        Opcode::MulHash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Opcode::Add => "OP_ADD",
            Opcode::Minus => "OP_MINUS",
            Opcode::Mul => "OP_MUL",
            Opcode::EqualVerify => "OP_EQ",
            Opcode::Equal => "OP_EQUAL",
            Opcode::CheckSig => "OP_CHECKSIG",
            Opcode::Addr => "OP_ADDR",
            Opcode::Dup => "OP_DUP",
            Opcode::NDup => "OP_NDUP",
            Opcode::CheckMulSig => "OP_CHECKMULSIG",
            Opcode::MulHash => "OP_MULHASH",
        }
    }

    pub fn from_name(name: &str) -> Option<Opcode> {
        Opcode::ALL.iter().copied().find(|op| op.name() == name)
    }
}

/// Stack value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(ByteString),
    Text(String),
    Int(i64),
    Bool(bool),
}

impl Value {
    fn is_truthy(&self) -> bool {
        match self {
            Value::Bytes(b) => b.iter().any(|&x| x != 0),
            Value::Text(s) => !s.is_empty(),
            Value::Int(i) => *i != 0,
            Value::Bool(b) => *b,
        }
    }
}

/// Script token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Op(Opcode),
    Push(Value),
}

impl Token {
    pub fn bytes(data: impl Into<ByteString>) -> Self {
        Token::Push(Value::Bytes(data.into()))
    }

    pub fn text(s: impl Into<String>) -> Self {
        Token::Push(Value::Text(s.into()))
    }

    pub fn int(i: i64) -> Self {
        Token::Push(Value::Int(i))
    }

    /// Parse one word of a textual script. Opcode names map to opcodes, integers to
    /// integer literals, anything else is pushed as a text literal.
    pub fn parse_word(word: &str) -> Self {
        if let Some(op) = Opcode::from_name(word) {
            return Token::Op(op);
        }
        match word.parse::<i64>() {
            Ok(i) => Token::int(i),
            Err(_) => Token::text(word),
        }
    }
}

/// Parse a whitespace-separated textual script
pub fn parse_script(script: &str) -> Vec<Token> {
    script.split_whitespace().map(Token::parse_word).collect()
}

/// Locking script of an output paying to `address`
pub fn pubkey_script(address: &str) -> Vec<Token> {
    parse_script(&format!("OP_DUP OP_ADDR {} OP_EQ OP_CHECKSIG", address))
}

/// Split a raw `signature || pubkey` into its two pushes. `None` if the length is wrong.
pub fn signature_script(sig_script: &[u8]) -> Option<Vec<Token>> {
    if sig_script.len() != SIG_SCRIPT_SIZE {
        return None;
    }
    let (signature, pubkey) = sig_script.split_at(SIGNATURE_SIZE);
    Some(vec![Token::bytes(signature), Token::bytes(pubkey)])
}

/// EvalScript: run `script` on `stack`.
///
/// Returns `Ok(false)` when a verify-style opcode fails and `Err` on malformed
/// scripts (underflow, type mismatch, limits).
pub fn eval_script(script: &[Token], stack: &mut Vec<Value>, message: &[u8]) -> Result<bool> {
    if script.len() > MAX_SCRIPT_OPS {
        return Err(LedgerError::ScriptExecution("Operation limit exceeded".to_string()));
    }

    for token in script {
        if stack.len() > MAX_STACK_SIZE {
            return Err(LedgerError::ScriptExecution("Stack overflow".to_string()));
        }

        match token {
            Token::Push(value) => stack.push(value.clone()),
            Token::Op(op) => {
                if !execute_opcode(*op, stack, message)? {
                    return Ok(false);
                }
            }
        }
    }

    Ok(stack.len() == 1 && stack[0].is_truthy())
}

/// VerifyScript: unlocking tokens followed by locking tokens on one stack
pub fn verify_script(sig_script: &[Token], pubkey_script: &[Token], message: &[u8]) -> Result<bool> {
    let mut script = Vec::with_capacity(sig_script.len() + pubkey_script.len());
    script.extend_from_slice(sig_script);
    script.extend_from_slice(pubkey_script);
    let mut stack = Vec::new();
    eval_script(&script, &mut stack, message)
}

/// Script evaluator entry point: any execution error counts as failure
pub fn evaluate(script: &[Token], message: &[u8]) -> bool {
    let mut stack = Vec::new();
    eval_script(script, &mut stack, message).unwrap_or(false)
}

fn execute_opcode(op: Opcode, stack: &mut Vec<Value>, message: &[u8]) -> Result<bool> {
    match op {
        Opcode::Add => {
            let (a, b) = pop_int_pair(stack)?;
            stack.push(Value::Int(checked(a.checked_add(b))?));
            Ok(true)
        }

        Opcode::Minus => {
            let (a, b) = pop_int_pair(stack)?;
            stack.push(Value::Int(checked(a.checked_sub(b))?));
            Ok(true)
        }

        Opcode::Mul => {
            let (a, b) = pop_int_pair(stack)?;
            stack.push(Value::Int(checked(a.checked_mul(b))?));
            Ok(true)
        }

        Opcode::EqualVerify => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            Ok(a == b)
        }

        Opcode::Equal => {
            let a = pop(stack)?;
            let b = pop(stack)?;
            stack.push(Value::Bool(a == b));
            Ok(true)
        }

        Opcode::CheckSig => {
            let pubkey = pop_bytes(stack)?;
            let signature = pop_bytes(stack)?;
            stack.push(Value::Bool(verify(&pubkey, &signature, message)));
            Ok(true)
        }

        Opcode::Addr => {
            let pubkey = pop_bytes(stack)?;
            stack.push(Value::Text(address_of(&pubkey)));
            Ok(true)
        }

        Opcode::Dup => {
            let top = stack
                .last()
                .cloned()
                .ok_or_else(|| underflow("OP_DUP"))?;
            stack.push(top);
            Ok(true)
        }

        Opcode::NDup => {
            let n = pop_count(stack)?;
            if n > stack.len() {
                return Err(underflow("OP_NDUP"));
            }
            let copied: Vec<Value> = stack[stack.len() - n..].to_vec();
            stack.extend(copied);
            stack.push(Value::Int(n as i64));
            Ok(true)
        }

        Opcode::MulHash => {
            let n = pop_count(stack)?;
            let pubkeys = pop_n_bytes(stack, n)?;
            let joined: Vec<u8> = pubkeys.concat();
            stack.push(Value::Bytes(double_hash(&joined).to_vec()));
            Ok(true)
        }

        Opcode::CheckMulSig => {
            let n = pop_count(stack)?;
            let pubkeys = pop_n_bytes(stack, n)?;
            let m = pop_count(stack)?;
            if m > n {
                return Err(LedgerError::ScriptExecution(format!(
                    "OP_CHECKMULSIG wants {} signatures from {} keys",
                    m, n
                )));
            }
            let signatures = pop_n_bytes(stack, m)?;
            stack.push(Value::Bool(check_multisig(&signatures, &pubkeys, message)));
            Ok(true)
        }
    }
}

/// Every signature must match a distinct key, keys consumed in order
fn check_multisig(signatures: &[ByteString], pubkeys: &[ByteString], message: &[u8]) -> bool {
    let mut keys = pubkeys.iter();
    signatures
        .iter()
        .all(|sig| keys.by_ref().any(|pk| verify(pk, sig, message)))
}

fn underflow(op: &str) -> LedgerError {
    LedgerError::ScriptExecution(format!("Stack underflow in {}", op))
}

fn checked(value: Option<i64>) -> Result<i64> {
    value.ok_or_else(|| LedgerError::ScriptExecution("Integer overflow".to_string()))
}

fn pop(stack: &mut Vec<Value>) -> Result<Value> {
    stack.pop().ok_or_else(|| underflow("pop"))
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i64> {
    match pop(stack)? {
        Value::Int(i) => Ok(i),
        other => Err(LedgerError::ScriptExecution(format!("Expected integer, found {:?}", other))),
    }
}

/// Pops `b` then `a`, returning `(a, b)`
fn pop_int_pair(stack: &mut Vec<Value>) -> Result<(i64, i64)> {
    let b = pop_int(stack)?;
    let a = pop_int(stack)?;
    Ok((a, b))
}

fn pop_count(stack: &mut Vec<Value>) -> Result<usize> {
    let n = pop_int(stack)?;
    usize::try_from(n)
        .ok()
        .filter(|&n| n <= MAX_STACK_SIZE)
        .ok_or_else(|| LedgerError::ScriptExecution(format!("Invalid count {}", n)))
}

fn pop_bytes(stack: &mut Vec<Value>) -> Result<ByteString> {
    match pop(stack)? {
        Value::Bytes(b) => Ok(b),
        other => Err(LedgerError::ScriptExecution(format!("Expected bytes, found {:?}", other))),
    }
}

/// Pops `n` byte strings and returns them in push order
fn pop_n_bytes(stack: &mut Vec<Value>, n: usize) -> Result<Vec<ByteString>> {
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        items.push(pop_bytes(stack)?);
    }
    items.reverse();
    Ok(items)
}
