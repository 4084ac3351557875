use clap::ValueEnum;
use log::{debug, info, warn};
use serde::Serialize;
use std::{borrow::Cow, collections::HashMap, fmt};

use crate::{
    ArquivoSped, Campos, Registro0000, Registro0150, Registro0200, RegistroC100, RegistroC110,
    RegistroC113, RegistroC170, RegistroC190, RegistroE111, tokenize,
};

/// Codificação de caracteres do arquivo Sped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, ValueEnum)]
pub enum Codificacao {
    /// ISO-8859-1, padrão do PVA.
    #[default]
    Latin1,
    /// Windows-1252 (Latin1 com aspas tipográficas, travessões e o símbolo do euro).
    Windows1252,
    /// UTF-8; sequências inválidas são substituídas por U+FFFD.
    Utf8,
}

impl fmt::Display for Codificacao {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            Codificacao::Latin1 => "ISO-8859-1",
            Codificacao::Windows1252 => "Windows-1252",
            Codificacao::Utf8 => "UTF-8",
        };
        write!(f, "{nome}")
    }
}

/// Caracteres do Windows-1252 na faixa 0x80..=0x9F.
/// As posições indefinidas mantêm o ponto de código de controle do Latin1.
const WINDOWS_1252_C1: [char; 32] = [
    '\u{20AC}', '\u{0081}', '\u{201A}', '\u{0192}', '\u{201E}', '\u{2026}', '\u{2020}', '\u{2021}',
    '\u{02C6}', '\u{2030}', '\u{0160}', '\u{2039}', '\u{0152}', '\u{008D}', '\u{017D}', '\u{008F}',
    '\u{0090}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{2022}', '\u{2013}', '\u{2014}',
    '\u{02DC}', '\u{2122}', '\u{0161}', '\u{203A}', '\u{0153}', '\u{009D}', '\u{017E}', '\u{0178}',
];

/// Converte os bytes do arquivo em texto. Nunca falha.
///
/// ```
/// use sped_devolucoes_reforma::{Codificacao, decodificar_texto};
///
/// let bytes = b"|0150|F1|Jo\xe3o|";
/// assert_eq!(decodificar_texto(bytes, Codificacao::Latin1), "|0150|F1|João|");
/// assert_eq!(decodificar_texto(b"\x93ok\x94", Codificacao::Windows1252), "\u{201C}ok\u{201D}");
/// ```
pub fn decodificar_texto(bytes: &[u8], codificacao: Codificacao) -> Cow<'_, str> {
    match codificacao {
        Codificacao::Utf8 => {
            let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
            String::from_utf8_lossy(bytes)
        }
        _ if bytes.is_ascii() => {
            // ASCII puro é válido nas três codificações.
            Cow::Borrowed(std::str::from_utf8(bytes).unwrap_or_default())
        }
        Codificacao::Latin1 => Cow::Owned(bytes.iter().map(|&b| char::from(b)).collect()),
        Codificacao::Windows1252 => Cow::Owned(
            bytes
                .iter()
                .map(|&b| match b {
                    0x80..=0x9F => WINDOWS_1252_C1[usize::from(b - 0x80)],
                    _ => char::from(b),
                })
                .collect(),
        ),
    }
}

/// Uma linha do arquivo já convertida no registro correspondente.
#[derive(Debug)]
enum Registro {
    Abertura(Registro0000),
    Participante(Registro0150),
    Item(Registro0200),
    Documento(RegistroC100),
    Complemento(RegistroC110),
    Referencia(RegistroC113),
    ItemDocumento(RegistroC170),
    Analitico(RegistroC190),
    Ajuste(RegistroE111),
    Ignorado,
}

impl Registro {
    fn from_campos(campos: &Campos, linha: usize) -> Self {
        match campos.registro().trim() {
            "0000" => Registro::Abertura(Registro0000::from_campos(campos)),
            "0150" => Registro::Participante(Registro0150::from_campos(campos)),
            "0200" => Registro::Item(Registro0200::from_campos(campos)),
            "C100" => Registro::Documento(RegistroC100::from_campos(campos, linha)),
            "C110" => Registro::Complemento(RegistroC110::from_campos(campos)),
            "C113" => Registro::Referencia(RegistroC113::from_campos(campos)),
            "C170" => Registro::ItemDocumento(RegistroC170::from_campos(campos)),
            "C190" => Registro::Analitico(RegistroC190::from_campos(campos)),
            "E111" => Registro::Ajuste(RegistroE111::from_campos(campos)),
            _ => Registro::Ignorado,
        }
    }
}

/// Acumulador da passagem única sobre as linhas.
#[derive(Default)]
struct Decodificacao {
    arquivo: ArquivoSped,
    documento_atual: Option<RegistroC100>,
    posicao_item: HashMap<String, usize>,
    posicao_participante: HashMap<String, usize>,
}

impl Decodificacao {
    fn consumir(&mut self, registro: Registro, linha: usize) {
        let estatisticas = &mut self.arquivo.estatisticas;

        match registro {
            Registro::Abertura(abertura) => {
                estatisticas.aberturas += 1;
                if self.arquivo.registro_0000.is_some() {
                    warn!("Registro 0000 repetido na linha {linha}: prevalece o último.");
                }
                self.arquivo.registro_0000 = Some(abertura);
            }
            Registro::Participante(participante) => {
                let chave = participante.cod_part.clone();
                match self.posicao_participante.get(&chave) {
                    Some(&posicao) => {
                        estatisticas.duplicados += 1;
                        warn!("Participante <{chave}> repetido na linha {linha}: prevalece o último.");
                        self.arquivo.participantes[posicao] = participante;
                    }
                    None => {
                        self.posicao_participante
                            .insert(chave, self.arquivo.participantes.len());
                        self.arquivo.participantes.push(participante);
                    }
                }
            }
            Registro::Item(item) => {
                let chave = item.cod_item.clone();
                match self.posicao_item.get(&chave) {
                    Some(&posicao) => {
                        estatisticas.duplicados += 1;
                        warn!("Item <{chave}> repetido na linha {linha}: prevalece o último.");
                        self.arquivo.itens[posicao] = item;
                    }
                    None => {
                        self.posicao_item.insert(chave, self.arquivo.itens.len());
                        self.arquivo.itens.push(item);
                    }
                }
            }
            Registro::Documento(documento) => {
                debug!(
                    "C100 na linha {linha}: num_doc={} ind_oper={}",
                    documento.num_doc, documento.ind_oper
                );
                if let Some(anterior) = self.documento_atual.replace(documento) {
                    self.arquivo.documentos.push(anterior);
                }
            }
            Registro::Complemento(filho) => match self.documento_atual.as_mut() {
                Some(doc) => doc.complementares.push(filho),
                None => self.orfao("C110", linha),
            },
            Registro::Referencia(filho) => match self.documento_atual.as_mut() {
                Some(doc) => doc.referencias.push(filho),
                None => self.orfao("C113", linha),
            },
            Registro::ItemDocumento(filho) => match self.documento_atual.as_mut() {
                Some(doc) => doc.itens.push(filho),
                None => self.orfao("C170", linha),
            },
            Registro::Analitico(filho) => match self.documento_atual.as_mut() {
                Some(doc) => doc.analiticos.push(filho),
                None => self.orfao("C190", linha),
            },
            Registro::Ajuste(ajuste) => self.arquivo.ajustes.push(ajuste),
            Registro::Ignorado => estatisticas.desconhecidos += 1,
        }
    }

    fn orfao(&mut self, registro: &str, linha: usize) {
        self.arquivo.estatisticas.orfaos += 1;
        warn!("Registro {registro} sem C100 anterior na linha {linha}: ignorado.");
    }

    fn concluir(mut self) -> ArquivoSped {
        if let Some(documento) = self.documento_atual.take() {
            self.arquivo.documentos.push(documento);
        }
        self.arquivo
    }
}

/// Decodifica o conteúdo de um arquivo Sped EFD ICMS/IPI.
///
/// A função é total: qualquer sequência de bytes produz um `ArquivoSped`
/// (possivelmente vazio). Linhas em branco são ignoradas; registros de tipo
/// desconhecido e registros filhos sem C100 anterior são contados em
/// `estatisticas` e descartados.
///
/// ```
/// use sped_devolucoes_reforma::{Codificacao, decodificar};
///
/// let conteudo = b"|0000|017|0|01012024|31012024|EMPRESA|12345678000190||SP|\n\
///                  |C100|1|0|F001|55|00|1|123|||||\n\
///                  |C170|1|ITEM01||2|UN|100,00|0|0|000|5102|\n";
///
/// let arquivo = decodificar(conteudo, Codificacao::Latin1);
/// assert_eq!(arquivo.documentos.len(), 1);
/// assert_eq!(arquivo.documentos[0].itens[0].cfop, "5102");
/// assert_eq!(arquivo.uf_declarante(), Some("SP"));
/// ```
pub fn decodificar(bytes: &[u8], codificacao: Codificacao) -> ArquivoSped {
    let texto = decodificar_texto(bytes, codificacao);
    let mut decodificacao = Decodificacao::default();

    for (indice, linha) in texto.lines().enumerate() {
        let numero_da_linha = indice + 1;

        let Some(campos) = tokenize(linha) else {
            continue;
        };

        let estatisticas = &mut decodificacao.arquivo.estatisticas;
        estatisticas.linhas += 1;
        *estatisticas
            .por_registro
            .entry(campos.registro().trim().to_string())
            .or_insert(0) += 1;

        let registro = Registro::from_campos(&campos, numero_da_linha);
        estatisticas.campos_invalidos += campos.campos_invalidos();

        decodificacao.consumir(registro, numero_da_linha);
    }

    let mut arquivo = decodificacao.concluir();
    arquivo.impressao_digital = blake3::hash(bytes).to_hex().to_string();

    if arquivo.registro_0000.is_none() && !arquivo.is_empty() {
        warn!("Arquivo sem registro 0000 (abertura).");
    }

    info!(
        "Decodificadas {} linhas: {} participantes, {} itens, {} documentos, {} ajustes ({} campos inválidos, {} órfãos).",
        arquivo.estatisticas.linhas,
        arquivo.participantes.len(),
        arquivo.itens.len(),
        arquivo.documentos.len(),
        arquivo.ajustes.len(),
        arquivo.estatisticas.campos_invalidos,
        arquivo.estatisticas.orfaos,
    );

    arquivo
}
