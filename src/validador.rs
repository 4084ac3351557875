use log::{debug, info};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
};

use crate::{
    ArquivoSped, Enriquecimento, IndOper, Registro0150, RegistroC100, RegistroC170,
    RegistroC190, TabelasCfop, TipoDevolucao, normalizar_cfop,
};

/// Diferença máxima aceita entre o C190 e a soma dos C170 do mesmo CFOP.
pub const TOLERANCIA: Decimal = dec!(0.05);

/// Código de finalidade da NF-e (finNFe) que indica devolução.
pub const FINALIDADE_DEVOLUCAO: &str = "4";

/// Gravidade de uma inconsistência.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Nivel {
    Erro,
    Alerta,
    Info,
}

impl fmt::Display for Nivel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            Nivel::Erro => "ERRO",
            Nivel::Alerta => "ALERTA",
            Nivel::Info => "INFO",
        };
        write!(f, "{nome}")
    }
}

/// Regras de validação de devoluções.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Regra {
    /// ind_oper x 1º dígito do CFOP.
    R1,
    /// CFOP interno/interestadual x UF do declarante e do participante.
    R1Uf,
    /// Classificação do documento pelos CFOPs.
    R2,
    /// Tipo de devolução x sentido da operação (opcional).
    R2Sentido,
    /// Documento referenciado (C113).
    R3,
    /// CFOPs de devolução e de operação normal no mesmo documento.
    R4,
    /// C170 x C190.
    R5,
    /// finNFe do XML.
    R6,
}

impl fmt::Display for Regra {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nome = match self {
            Regra::R1 => "R1",
            Regra::R1Uf => "R1-UF",
            Regra::R2 => "R2",
            Regra::R2Sentido => "R2-SENTIDO",
            Regra::R3 => "R3",
            Regra::R4 => "R4",
            Regra::R5 => "R5",
            Regra::R6 => "R6",
        };
        write!(f, "{nome}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Inconsistencia {
    pub regra: Regra,
    pub nivel: Nivel,
    pub mensagem: String,
    /// Valores que motivaram a inconsistência (campo -> valor).
    pub campos: BTreeMap<String, String>,
}

impl Inconsistencia {
    pub fn new(regra: Regra, nivel: Nivel, mensagem: impl Into<String>) -> Self {
        Self {
            regra,
            nivel,
            mensagem: mensagem.into(),
            campos: BTreeMap::new(),
        }
    }

    pub fn com_campo(mut self, campo: &str, valor: impl ToString) -> Self {
        self.campos.insert(campo.to_string(), valor.to_string());
        self
    }
}

impl fmt::Display for Inconsistencia {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.regra, self.mensagem)
    }
}

/// Resultado da validação de um documento C100.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultadoDocumento {
    pub is_devolucao: bool,
    pub tipo_devolucao: TipoDevolucao,
    pub evidencias: Vec<String>,
    pub inconsistencias: Vec<Inconsistencia>,
    pub num_doc: String,
    pub chv_nfe: String,
    /// Linha do C100 no arquivo.
    pub linha: usize,
}

impl ResultadoDocumento {
    pub fn contar(&self, nivel: Nivel) -> usize {
        self.inconsistencias
            .iter()
            .filter(|i| i.nivel == nivel)
            .count()
    }

    pub fn possui_regra(&self, regra: Regra) -> bool {
        self.inconsistencias.iter().any(|i| i.regra == regra)
    }
}

/// Totais da validação de um arquivo.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResumoValidacao {
    pub total_documentos: usize,
    pub total_devolucoes: usize,
    pub devolucoes_venda: usize,
    pub devolucoes_compra: usize,
    pub documentos_misto: usize,
    pub total_erros: usize,
    pub total_alertas: usize,
    pub total_infos: usize,
    pub resultados: Vec<ResultadoDocumento>,
}

impl ResumoValidacao {
    fn acumular(&mut self, resultado: ResultadoDocumento) {
        self.total_documentos += 1;

        if resultado.is_devolucao {
            self.total_devolucoes += 1;
            match resultado.tipo_devolucao {
                TipoDevolucao::DevolucaoVenda => self.devolucoes_venda += 1,
                TipoDevolucao::DevolucaoCompra => self.devolucoes_compra += 1,
                TipoDevolucao::Misto => self.documentos_misto += 1,
                TipoDevolucao::NaoDevolucao | TipoDevolucao::NaoDefinido => {}
            }
        }

        self.total_erros += resultado.contar(Nivel::Erro);
        self.total_alertas += resultado.contar(Nivel::Alerta);
        self.total_infos += resultado.contar(Nivel::Info);

        self.resultados.push(resultado);
    }

    /// Documentos com ao menos uma inconsistência de nível Erro ou Alerta.
    pub fn documentos_com_pendencias(&self) -> impl Iterator<Item = &ResultadoDocumento> {
        self.resultados
            .iter()
            .filter(|r| r.contar(Nivel::Erro) + r.contar(Nivel::Alerta) > 0)
    }
}

/// Opções que alteram o comportamento das regras.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OpcoesValidacao {
    /// R4 passa de Erro para Alerta.
    pub permitir_misto: bool,
    /// Ativa a regra R2-SENTIDO.
    pub verificar_sentido: bool,
}

// --- Regras isoladas ---

/// R1: ind_oper=0 exige CFOP 1.xxx/2.xxx; ind_oper=1 exige CFOP 5.xxx/6.xxx.
pub fn validar_regra_r1(ind_oper: &IndOper, cfop: &str) -> Option<Inconsistencia> {
    let cfop = normalizar_cfop(cfop);
    let primeiro_digito = cfop.chars().next()?;

    let (esperados, sentido) = match ind_oper {
        IndOper::Entrada => (['1', '2'], "Entrada"),
        IndOper::Saida => (['5', '6'], "Saída"),
        IndOper::Desconhecido => return None,
    };

    if esperados.contains(&primeiro_digito) {
        return None;
    }

    let mensagem = format!(
        "CFOP {cfop} incompatível com {sentido} (ind_oper={}). Esperado CFOP iniciando com {} ou {}, encontrado {primeiro_digito}.",
        ind_oper.codigo(),
        esperados[0],
        esperados[1],
    );

    Some(
        Inconsistencia::new(Regra::R1, Nivel::Erro, mensagem)
            .com_campo("ind_oper", ind_oper.codigo())
            .com_campo("cfop", &cfop),
    )
}

/// R1-UF: CFOP 1.xxx/5.xxx exige a mesma UF; CFOP 2.xxx/6.xxx exige UFs diferentes.
pub fn validar_intra_inter(
    cfop: &str,
    uf_emitente: &str,
    uf_destinatario: &str,
) -> Option<Inconsistencia> {
    let cfop = normalizar_cfop(cfop);
    let uf_emitente = uf_emitente.trim().to_uppercase();
    let uf_destinatario = uf_destinatario.trim().to_uppercase();

    if uf_emitente.is_empty() || uf_destinatario.is_empty() {
        return None;
    }

    let mesma_uf = uf_emitente == uf_destinatario;

    let mensagem = match cfop.chars().next()? {
        '1' | '5' if !mesma_uf => format!(
            "CFOP {cfop} é de operação interna, mas UF emitente ({uf_emitente}) difere da UF destinatário ({uf_destinatario})."
        ),
        '2' | '6' if mesma_uf => format!(
            "CFOP {cfop} é de operação interestadual, mas UF emitente ({uf_emitente}) é igual à UF destinatário ({uf_destinatario})."
        ),
        _ => return None,
    };

    Some(
        Inconsistencia::new(Regra::R1Uf, Nivel::Erro, mensagem)
            .com_campo("cfop", &cfop)
            .com_campo("uf_emitente", &uf_emitente)
            .com_campo("uf_destinatario", &uf_destinatario),
    )
}

/// R2: classificação do documento a partir da lista de CFOPs.
///
/// Retorna o tipo e as evidências ("CFOP=xxxx (descrição)"), sem repetições.
pub fn classificar_documento(
    tabelas: &TabelasCfop,
    cfops: &[String],
) -> (TipoDevolucao, Vec<String>) {
    let mut tipos = BTreeSet::new();
    let mut evidencias: Vec<String> = Vec::new();

    for cfop in cfops {
        let classificacao = tabelas.classificar(cfop);
        if classificacao.eh_devolucao {
            tipos.insert(classificacao.tipo);
            let evidencia = format!("CFOP={cfop} ({})", classificacao.descricao);
            if !evidencias.contains(&evidencia) {
                evidencias.push(evidencia);
            }
        }
    }

    let tipo = match tipos.len() {
        0 => TipoDevolucao::NaoDevolucao,
        1 => tipos
            .into_iter()
            .next()
            .unwrap_or(TipoDevolucao::NaoDevolucao),
        _ => TipoDevolucao::Misto,
    };

    (tipo, evidencias)
}

/// R2-SENTIDO: devolução de venda deveria ser entrada; devolução de compra, saída.
pub fn validar_sentido(ind_oper: &IndOper, tipo: TipoDevolucao) -> Option<Inconsistencia> {
    let mensagem = match (tipo, ind_oper) {
        (TipoDevolucao::DevolucaoVenda, IndOper::Saida) => {
            "Devolução de venda escriturada como Saída (ind_oper=1): o esperado é Entrada."
        }
        (TipoDevolucao::DevolucaoCompra, IndOper::Entrada) => {
            "Devolução de compra escriturada como Entrada (ind_oper=0): o esperado é Saída."
        }
        _ => return None,
    };

    Some(
        Inconsistencia::new(Regra::R2Sentido, Nivel::Alerta, mensagem)
            .com_campo("ind_oper", ind_oper.codigo())
            .com_campo("tipo_devolucao", tipo),
    )
}

/// R3: documento referenciado como evidência da devolução.
pub fn validar_regra_r3(tem_referencia: bool, tipo: TipoDevolucao) -> Option<Inconsistencia> {
    if !tipo.is_devolucao() {
        return None;
    }

    let inconsistencia = if tem_referencia {
        Inconsistencia::new(
            Regra::R3,
            Nivel::Info,
            "Devolução com documento original referenciado (C113/refNFe presente).",
        )
    } else {
        Inconsistencia::new(
            Regra::R3,
            Nivel::Alerta,
            "Devolução sem nota referenciada: revisar se a referência é obrigatória para esta UF/operação.",
        )
    };

    Some(inconsistencia)
}

/// R4: CFOPs de devolução e de operação normal no mesmo documento.
pub fn validar_regra_r4(
    tabelas: &TabelasCfop,
    cfops: &[String],
    permitir_misto: bool,
) -> Option<Inconsistencia> {
    let (devolucao, normal): (BTreeSet<&str>, BTreeSet<&str>) = cfops.iter().fold(
        (BTreeSet::new(), BTreeSet::new()),
        |(mut devolucao, mut normal), cfop| {
            if tabelas.eh_devolucao(cfop) {
                devolucao.insert(cfop.as_str());
            } else {
                normal.insert(cfop.as_str());
            }
            (devolucao, normal)
        },
    );

    if devolucao.is_empty() || normal.is_empty() {
        return None;
    }

    let lista_devolucao = devolucao.into_iter().collect::<Vec<_>>().join(", ");
    let lista_normal = normal.into_iter().collect::<Vec<_>>().join(", ");

    let mut mensagem = format!(
        "NF com CFOPs mistos: devolução ({lista_devolucao}) e não-devolução ({lista_normal}). O SPED espera consistência documental."
    );

    let nivel = if permitir_misto {
        mensagem.push_str(" (modo permissivo)");
        Nivel::Alerta
    } else {
        Nivel::Erro
    };

    Some(
        Inconsistencia::new(Regra::R4, nivel, mensagem)
            .com_campo("cfops_devolucao", lista_devolucao)
            .com_campo("cfops_normal", lista_normal),
    )
}

/// R5: cada CFOP do C190 deve ter itens C170 cuja soma de VL_ITEM não difira
/// do VL_OPR em mais que `TOLERANCIA`.
///
/// Só é avaliada quando há C190 e ao menos um C170.
pub fn validar_regra_r5(itens: &[RegistroC170], analiticos: &[RegistroC190]) -> Vec<Inconsistencia> {
    if itens.is_empty() || analiticos.is_empty() {
        return Vec::new();
    }

    let soma_por_cfop: HashMap<String, Decimal> =
        itens.iter().fold(HashMap::new(), |mut acc, item| {
            let cfop = normalizar_cfop(&item.cfop);
            if !cfop.is_empty() {
                *acc.entry(cfop).or_insert(Decimal::ZERO) += item.vl_item;
            }
            acc
        });

    analiticos
        .iter()
        .filter_map(|analitico| {
            let cfop = normalizar_cfop(&analitico.cfop);
            if cfop.is_empty() {
                return None;
            }

            let vl_opr = analitico.vl_opr;

            let Some(&soma) = soma_por_cfop.get(&cfop) else {
                return Some(
                    Inconsistencia::new(
                        Regra::R5,
                        Nivel::Alerta,
                        format!("CFOP {cfop} presente no C190 mas sem itens correspondentes no C170."),
                    )
                    .com_campo("cfop", &cfop)
                    .com_campo("vl_opr_c190", vl_opr),
                );
            };

            let diferenca = (vl_opr - soma).abs();
            if diferenca <= TOLERANCIA {
                return None;
            }

            Some(
                Inconsistencia::new(
                    Regra::R5,
                    Nivel::Erro,
                    format!(
                        "CFOP {cfop}: valor C190 (R$ {vl_opr}) difere do somatório C170 (R$ {soma}). Diferença: R$ {diferenca}."
                    ),
                )
                .com_campo("cfop", &cfop)
                .com_campo("vl_opr_c190", vl_opr)
                .com_campo("soma_c170", soma)
                .com_campo("diferenca", diferenca),
            )
        })
        .collect()
}

/// R6: corrobora a classificação com a finalidade (finNFe) do XML.
pub fn validar_regra_r6(fin_nfe: Option<&str>, tipo: TipoDevolucao) -> Option<Inconsistencia> {
    let fin_nfe = fin_nfe.map(str::trim).filter(|f| !f.is_empty())?;

    if fin_nfe == FINALIDADE_DEVOLUCAO {
        let inconsistencia = if tipo == TipoDevolucao::NaoDevolucao {
            Inconsistencia::new(
                Regra::R6,
                Nivel::Erro,
                "finNFe=4 (devolução no XML), mas CFOP não é de devolução: divergência.",
            )
            .com_campo("tipo_cfop", tipo)
        } else {
            Inconsistencia::new(
                Regra::R6,
                Nivel::Info,
                "Devolução confirmada: finNFe=4 e CFOP de devolução.",
            )
        };
        return Some(inconsistencia.com_campo("fin_nfe", fin_nfe));
    }

    tipo.is_devolucao().then(|| {
        Inconsistencia::new(
            Regra::R6,
            Nivel::Alerta,
            format!(
                "CFOP indica devolução, mas finNFe={fin_nfe} (não é devolução): verificar emissão/cadastro."
            ),
        )
        .com_campo("fin_nfe", fin_nfe)
        .com_campo("tipo_cfop", tipo)
    })
}

/// CFOPs do documento, na ordem em que aparecem: dos itens C170 ou, na falta
/// deles, dos registros analíticos C190.
pub fn cfops_do_documento(documento: &RegistroC100) -> Vec<String> {
    let dos_itens: Vec<String> = documento
        .itens
        .iter()
        .map(|item| normalizar_cfop(&item.cfop))
        .filter(|cfop| !cfop.is_empty())
        .collect();

    if !dos_itens.is_empty() {
        return dos_itens;
    }

    documento
        .analiticos
        .iter()
        .map(|analitico| normalizar_cfop(&analitico.cfop))
        .filter(|cfop| !cfop.is_empty())
        .collect()
}

fn sem_repeticao(cfops: &[String]) -> Vec<&String> {
    let mut vistos = BTreeSet::new();
    cfops.iter().filter(|cfop| vistos.insert(*cfop)).collect()
}

/// Validador de devoluções de um arquivo Sped.
///
/// Reúne o contexto de uma execução: tabelas de CFOP, UF do declarante,
/// finalidades das NF-e e dados externos dos participantes.
#[derive(Debug, Clone, Default)]
pub struct Validador {
    pub tabelas: TabelasCfop,
    pub opcoes: OpcoesValidacao,
    pub uf_empresa: Option<String>,
    /// Chave de acesso -> finNFe.
    pub fin_nfe: HashMap<String, String>,
    /// CNPJ/CPF do participante -> dados externos.
    pub enriquecimentos: HashMap<String, Enriquecimento>,
}

impl Validador {
    pub fn new(tabelas: TabelasCfop, opcoes: OpcoesValidacao) -> Self {
        Self {
            tabelas,
            opcoes,
            ..Default::default()
        }
    }

    pub fn com_uf_empresa(mut self, uf: Option<&str>) -> Self {
        self.uf_empresa = uf
            .map(|uf| uf.trim().to_uppercase())
            .filter(|uf| !uf.is_empty());
        self
    }

    pub fn com_fin_nfe(mut self, fin_nfe: HashMap<String, String>) -> Self {
        self.fin_nfe = fin_nfe;
        self
    }

    pub fn com_enriquecimentos(mut self, enriquecimentos: HashMap<String, Enriquecimento>) -> Self {
        self.enriquecimentos = enriquecimentos;
        self
    }

    /// UF do participante: a informada externamente prevalece sobre a
    /// derivada do código do município (0150).
    pub fn uf_participante<'a>(
        &'a self,
        participantes: &HashMap<&str, &'a Registro0150>,
        cod_part: &str,
    ) -> Option<&'a str> {
        let participante = *participantes.get(cod_part)?;

        let externa = participante
            .cnpj_cpf()
            .and_then(|doc| self.enriquecimentos.get(doc))
            .and_then(|info| info.uf.as_deref())
            .map(str::trim)
            .filter(|uf| !uf.is_empty());

        externa.or_else(|| participante.uf())
    }

    /// Aplica as regras a um documento. Nunca falha: toda anomalia vira uma
    /// inconsistência no resultado.
    pub fn validar_documento(
        &self,
        documento: &RegistroC100,
        uf_participante: Option<&str>,
    ) -> ResultadoDocumento {
        let mut resultado = ResultadoDocumento {
            is_devolucao: false,
            tipo_devolucao: TipoDevolucao::NaoDefinido,
            evidencias: Vec::new(),
            inconsistencias: Vec::new(),
            num_doc: documento.num_doc.clone(),
            chv_nfe: documento.chv_nfe.clone(),
            linha: documento.linha,
        };

        let cfops = cfops_do_documento(documento);

        if cfops.is_empty() {
            let num_doc = if documento.num_doc.is_empty() {
                "?"
            } else {
                &documento.num_doc
            };
            resultado.inconsistencias.push(Inconsistencia::new(
                Regra::R2,
                Nivel::Alerta,
                format!("Documento {num_doc} sem CFOP nos itens (C170) nem nos analíticos (C190)."),
            ));
            return resultado;
        }

        let unicos = sem_repeticao(&cfops);

        // R1
        resultado.inconsistencias.extend(
            unicos
                .iter()
                .filter_map(|cfop| validar_regra_r1(&documento.ind_oper, cfop)),
        );

        // R1-UF
        let ufs = self
            .uf_empresa
            .as_deref()
            .zip(uf_participante.map(str::trim).filter(|uf| !uf.is_empty()));

        if let Some((uf_empresa, uf_part)) = ufs {
            resultado.inconsistencias.extend(
                unicos
                    .iter()
                    .filter_map(|cfop| validar_intra_inter(cfop, uf_empresa, uf_part)),
            );
        }

        // R2
        let (tipo, evidencias) = classificar_documento(&self.tabelas, &cfops);
        resultado.tipo_devolucao = tipo;
        resultado.is_devolucao = tipo.is_devolucao();
        resultado.evidencias.extend(evidencias);

        if self.opcoes.verificar_sentido {
            resultado
                .inconsistencias
                .extend(validar_sentido(&documento.ind_oper, tipo));
        }

        // R3
        let referencia = documento
            .referencias
            .iter()
            .map(|r| r.chv_doc.trim())
            .find(|chave| chave.chars().count() >= 44);

        if let Some(chave) = referencia {
            let inicio: String = chave.chars().take(20).collect();
            resultado.evidencias.push(format!("refNFe={inicio}..."));
        }

        resultado
            .inconsistencias
            .extend(validar_regra_r3(referencia.is_some(), tipo));

        // R4
        resultado.inconsistencias.extend(validar_regra_r4(
            &self.tabelas,
            &cfops,
            self.opcoes.permitir_misto,
        ));

        // R5
        resultado
            .inconsistencias
            .extend(validar_regra_r5(&documento.itens, &documento.analiticos));

        // R6
        let fin_nfe = self.fin_nfe.get(documento.chv_nfe.trim()).map(String::as_str);
        if let Some(r6) = validar_regra_r6(fin_nfe, tipo) {
            if r6.campos.get("fin_nfe").map(String::as_str) == Some(FINALIDADE_DEVOLUCAO) {
                resultado
                    .evidencias
                    .push("finNFe=4 (devolução no XML)".to_string());
            }
            resultado.inconsistencias.push(r6);
        }

        if ufs.is_some() && !resultado.possui_regra(Regra::R1Uf) {
            resultado.evidencias.push("intra/inter coerente".to_string());
        }

        debug!(
            "Documento {} (linha {}): {} com {} inconsistência(s).",
            resultado.num_doc,
            resultado.linha,
            resultado.tipo_devolucao,
            resultado.inconsistencias.len()
        );

        resultado
    }

    /// Valida todos os documentos C100 do arquivo.
    ///
    /// Sem UF da empresa configurada, usa a UF do registro 0000.
    pub fn validar_arquivo(&self, arquivo: &ArquivoSped) -> ResumoValidacao {
        let uf_empresa = self
            .uf_empresa
            .clone()
            .or_else(|| arquivo.uf_declarante().map(str::to_uppercase));

        let validador = Validador {
            uf_empresa,
            ..self.clone()
        };

        let participantes = arquivo.indice_participantes();

        let resumo = arquivo
            .documentos
            .iter()
            .fold(ResumoValidacao::default(), |mut resumo, documento| {
                let uf_part = validador.uf_participante(&participantes, &documento.cod_part);
                resumo.acumular(validador.validar_documento(documento, uf_part));
                resumo
            });

        info!(
            "Validação de devoluções concluída: {} documentos, {} devoluções ({} venda, {} compra, {} mistos), {} erros, {} alertas.",
            resumo.total_documentos,
            resumo.total_devolucoes,
            resumo.devolucoes_venda,
            resumo.devolucoes_compra,
            resumo.documentos_misto,
            resumo.total_erros,
            resumo.total_alertas,
        );

        resumo
    }
}

/// Valida todos os documentos de um arquivo com as tabelas de CFOP padrão.
///
/// ```
/// use sped_devolucoes_reforma::{Codificacao, decodificar, validar_documentos_sped};
/// use std::collections::HashMap;
///
/// let arquivo = decodificar(b"|C100|1|0|F1|55|00|1|10|||||\n|C170|1|X||1|UN|10,00|0|0|000|5202|\n", Codificacao::Latin1);
/// let resumo = validar_documentos_sped(&arquivo, None, &HashMap::new(), false);
///
/// assert_eq!(resumo.total_documentos, 1);
/// assert_eq!(resumo.devolucoes_compra, 1);
/// assert_eq!(resumo.total_erros, 0);
/// ```
pub fn validar_documentos_sped(
    arquivo: &ArquivoSped,
    uf_empresa: Option<&str>,
    fin_nfe_map: &HashMap<String, String>,
    permitir_misto: bool,
) -> ResumoValidacao {
    let opcoes = OpcoesValidacao {
        permitir_misto,
        ..Default::default()
    };

    Validador::new(TabelasCfop::default(), opcoes)
        .com_uf_empresa(uf_empresa)
        .com_fin_nfe(fin_nfe_map.clone())
        .validar_arquivo(arquivo)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegistroC113;

    fn item(cfop: &str, vl_item: Decimal) -> RegistroC170 {
        RegistroC170 {
            cfop: cfop.to_string(),
            vl_item,
            ..Default::default()
        }
    }

    fn analitico(cfop: &str, vl_opr: Decimal) -> RegistroC190 {
        RegistroC190 {
            cfop: cfop.to_string(),
            vl_opr,
            ..Default::default()
        }
    }

    fn documento(ind_oper: IndOper, cfops: &[&str]) -> RegistroC100 {
        RegistroC100 {
            ind_oper,
            num_doc: "123".to_string(),
            chv_nfe: "1".repeat(44),
            itens: cfops.iter().map(|cfop| item(cfop, dec!(100))).collect(),
            ..Default::default()
        }
    }

    fn regras(resultado: &ResultadoDocumento) -> Vec<(Regra, Nivel)> {
        resultado
            .inconsistencias
            .iter()
            .map(|i| (i.regra, i.nivel))
            .collect()
    }

    #[test]
    fn r1_sentido_incompativel() {
        let r1 = validar_regra_r1(&IndOper::Entrada, "5102").unwrap();
        assert_eq!((r1.regra, r1.nivel), (Regra::R1, Nivel::Erro));
        assert!(r1.mensagem.contains("encontrado 5"));

        assert!(validar_regra_r1(&IndOper::Entrada, "2.102").is_none());
        assert!(validar_regra_r1(&IndOper::Saida, "6102").is_none());
        assert!(validar_regra_r1(&IndOper::Saida, "1202").is_some());
        assert!(validar_regra_r1(&IndOper::Saida, "").is_none());
        assert!(validar_regra_r1(&IndOper::Desconhecido, "1202").is_none());
    }

    #[test]
    fn r1_uf() {
        assert!(validar_intra_inter("5102", "SP", "sp").is_none());
        assert!(validar_intra_inter("6102", "SP", "RJ").is_none());
        assert_eq!(
            validar_intra_inter("5102", "SP", "RJ").map(|i| i.regra),
            Some(Regra::R1Uf)
        );
        assert!(validar_intra_inter("2202", "SP", "SP").is_some());
        assert!(validar_intra_inter("3102", "SP", "SP").is_none());
        assert!(validar_intra_inter("5102", "SP", "").is_none());
    }

    #[test]
    fn r2_classificacao() {
        let tabelas = TabelasCfop::default();
        let cfops = |lista: &[&str]| lista.iter().map(|c| c.to_string()).collect::<Vec<_>>();

        let (tipo, evidencias) = classificar_documento(&tabelas, &cfops(&["1202", "1202", "1411"]));
        assert_eq!(tipo, TipoDevolucao::DevolucaoVenda);
        assert_eq!(evidencias.len(), 2);
        assert!(evidencias[0].starts_with("CFOP=1202 (Devolução de venda"));

        let (tipo, _) = classificar_documento(&tabelas, &cfops(&["1202", "5202"]));
        assert_eq!(tipo, TipoDevolucao::Misto);

        let (tipo, evidencias) = classificar_documento(&tabelas, &cfops(&["5102"]));
        assert_eq!(tipo, TipoDevolucao::NaoDevolucao);
        assert!(evidencias.is_empty());
    }

    #[test]
    fn documento_sem_cfop() {
        let validador = Validador::default();
        let doc = RegistroC100 {
            num_doc: String::new(),
            ..Default::default()
        };
        let resultado = validador.validar_documento(&doc, None);
        assert_eq!(resultado.tipo_devolucao, TipoDevolucao::NaoDefinido);
        assert!(!resultado.is_devolucao);
        assert_eq!(regras(&resultado), vec![(Regra::R2, Nivel::Alerta)]);
        assert!(resultado.inconsistencias[0].mensagem.contains("Documento ?"));
    }

    #[test]
    fn cfops_do_c190_na_falta_de_itens() {
        let doc = RegistroC100 {
            ind_oper: IndOper::Entrada,
            analiticos: vec![analitico("1.202", dec!(10))],
            ..Default::default()
        };
        assert_eq!(cfops_do_documento(&doc), vec!["1202".to_string()]);

        let resultado = Validador::default().validar_documento(&doc, None);
        assert_eq!(resultado.tipo_devolucao, TipoDevolucao::DevolucaoVenda);
        // Sem C170 a R5 não é avaliada.
        assert!(!resultado.possui_regra(Regra::R5));
    }

    #[test]
    fn r3_referencia() {
        let mut doc = documento(IndOper::Entrada, &["1202"]);
        let validador = Validador::default();

        let sem_ref = validador.validar_documento(&doc, None);
        assert!(regras(&sem_ref).contains(&(Regra::R3, Nivel::Alerta)));

        doc.referencias.push(RegistroC113 {
            chv_doc: "35240198765432000110550010000001001000000010".to_string(),
            ..Default::default()
        });
        let com_ref = validador.validar_documento(&doc, None);
        assert!(regras(&com_ref).contains(&(Regra::R3, Nivel::Info)));
        assert!(com_ref.evidencias.contains(&"refNFe=35240198765432000110...".to_string()));

        // Chave curta não conta como referência.
        doc.referencias[0].chv_doc = "123".to_string();
        let curta = validador.validar_documento(&doc, None);
        assert!(regras(&curta).contains(&(Regra::R3, Nivel::Alerta)));
    }

    #[test]
    fn r3_nao_avaliada_fora_de_devolucao() {
        assert!(validar_regra_r3(false, TipoDevolucao::NaoDevolucao).is_none());
        assert!(validar_regra_r3(true, TipoDevolucao::NaoDefinido).is_none());
        assert!(validar_regra_r3(false, TipoDevolucao::Misto).is_some());
    }

    #[test]
    fn r4_cfops_mistos() {
        let tabelas = TabelasCfop::default();
        let cfops = vec!["5202".to_string(), "5102".to_string(), "5202".to_string()];

        let r4 = validar_regra_r4(&tabelas, &cfops, false).unwrap();
        assert_eq!(r4.nivel, Nivel::Erro);
        assert_eq!(r4.campos["cfops_devolucao"], "5202");
        assert_eq!(r4.campos["cfops_normal"], "5102");

        let permissivo = validar_regra_r4(&tabelas, &cfops, true).unwrap();
        assert_eq!(permissivo.nivel, Nivel::Alerta);
        assert!(permissivo.mensagem.ends_with("(modo permissivo)"));

        assert!(validar_regra_r4(&tabelas, &cfops[..1], false).is_none());
    }

    #[test]
    fn r5_tolerancia_exclusiva() {
        let itens = vec![item("5102", dec!(60.00)), item("5102", dec!(40.00))];

        assert!(validar_regra_r5(&itens, &[analitico("5102", dec!(100.05))]).is_empty());
        assert!(validar_regra_r5(&itens, &[analitico("5102", dec!(99.95))]).is_empty());

        let acima = validar_regra_r5(&itens, &[analitico("5102", dec!(100.06))]);
        assert_eq!(acima.len(), 1);
        assert_eq!(acima[0].nivel, Nivel::Erro);
        assert_eq!(acima[0].campos["diferenca"], "0.06");
    }

    #[test]
    fn r5_cfop_sem_itens() {
        let itens = vec![item("5102", dec!(10))];
        let achados = validar_regra_r5(
            &itens,
            &[analitico("5102", dec!(10)), analitico("5405", dec!(3)), analitico("", dec!(1))],
        );
        assert_eq!(achados.len(), 1);
        assert_eq!((achados[0].regra, achados[0].nivel), (Regra::R5, Nivel::Alerta));
        assert!(validar_regra_r5(&[], &[analitico("5102", dec!(1))]).is_empty());
    }

    #[test]
    fn r6_finalidade() {
        let r6 = validar_regra_r6(Some("4"), TipoDevolucao::NaoDevolucao).unwrap();
        assert_eq!(r6.nivel, Nivel::Erro);

        let r6 = validar_regra_r6(Some(" 4 "), TipoDevolucao::DevolucaoCompra).unwrap();
        assert_eq!(r6.nivel, Nivel::Info);

        let r6 = validar_regra_r6(Some("1"), TipoDevolucao::Misto).unwrap();
        assert_eq!(r6.nivel, Nivel::Alerta);

        assert!(validar_regra_r6(Some("1"), TipoDevolucao::NaoDevolucao).is_none());
        assert!(validar_regra_r6(Some(""), TipoDevolucao::DevolucaoVenda).is_none());
        assert!(validar_regra_r6(None, TipoDevolucao::DevolucaoVenda).is_none());
    }

    #[test]
    fn r6_acrescenta_evidencia() {
        let doc = documento(IndOper::Entrada, &["1202"]);
        let fin_nfe = HashMap::from([(doc.chv_nfe.clone(), "4".to_string())]);
        let validador = Validador::default().com_fin_nfe(fin_nfe);

        let resultado = validador.validar_documento(&doc, None);
        assert!(resultado.evidencias.contains(&"finNFe=4 (devolução no XML)".to_string()));
        assert!(regras(&resultado).contains(&(Regra::R6, Nivel::Info)));
    }

    #[test]
    fn devolucao_de_compra_em_documento_de_saida() {
        let doc = documento(IndOper::Saida, &["5202"]);
        let validador = Validador::default();
        let resultado = validador.validar_documento(&doc, None);

        assert_eq!(resultado.tipo_devolucao, TipoDevolucao::DevolucaoCompra);
        assert!(resultado.is_devolucao);
        assert!(!resultado.possui_regra(Regra::R1));

        let com_sentido = Validador::new(
            TabelasCfop::default(),
            OpcoesValidacao {
                verificar_sentido: true,
                ..Default::default()
            },
        );
        let resultado = com_sentido.validar_documento(&doc, None);
        assert!(!resultado.possui_regra(Regra::R2Sentido));

        let invertido = documento(IndOper::Entrada, &["5202"]);
        let resultado = com_sentido.validar_documento(&invertido, None);
        assert!(resultado.possui_regra(Regra::R2Sentido));
        assert!(resultado.possui_regra(Regra::R1));
    }

    #[test]
    fn evidencia_intra_inter_coerente() {
        let doc = documento(IndOper::Entrada, &["1202"]);
        let validador = Validador::default().com_uf_empresa(Some("sp"));

        let coerente = validador.validar_documento(&doc, Some("SP"));
        assert!(coerente.evidencias.contains(&"intra/inter coerente".to_string()));

        let incoerente = validador.validar_documento(&doc, Some("RJ"));
        assert!(incoerente.possui_regra(Regra::R1Uf));
        assert!(!incoerente.evidencias.contains(&"intra/inter coerente".to_string()));

        let sem_uf = validador.validar_documento(&doc, None);
        assert!(!sem_uf.evidencias.contains(&"intra/inter coerente".to_string()));
    }

    #[test]
    fn uf_do_participante_com_enriquecimento() {
        let arquivo = ArquivoSped {
            participantes: vec![Registro0150 {
                cod_part: "F1".into(),
                cnpj: "12345678000190".into(),
                cod_mun: "3304557".into(),
                ..Default::default()
            }],
            ..Default::default()
        };

        let participantes = arquivo.indice_participantes();

        let validador = Validador::default();
        assert_eq!(validador.uf_participante(&participantes, "F1"), Some("RJ"));
        assert_eq!(validador.uf_participante(&participantes, "F2"), None);

        let info = Enriquecimento {
            uf: Some("MG".into()),
            ..Default::default()
        };
        let validador =
            validador.com_enriquecimentos(HashMap::from([("12345678000190".to_string(), info)]));
        assert_eq!(validador.uf_participante(&participantes, "F1"), Some("MG"));
    }

    #[test]
    fn resumo_de_arquivo_vazio() {
        let resumo = validar_documentos_sped(&ArquivoSped::default(), Some("SP"), &HashMap::new(), false);
        assert_eq!(resumo, ResumoValidacao::default());
    }

    #[test]
    fn contadores_do_resumo() {
        let arquivo = ArquivoSped {
            documentos: vec![
                documento(IndOper::Entrada, &["1202"]),
                documento(IndOper::Saida, &["5202", "5102"]),
                documento(IndOper::Entrada, &["1202", "5202"]),
                documento(IndOper::Saida, &["5102"]),
                RegistroC100::default(),
            ],
            ..Default::default()
        };

        let resumo = validar_documentos_sped(&arquivo, None, &HashMap::new(), false);
        assert_eq!(resumo.total_documentos, 5);
        assert_eq!(resumo.total_devolucoes, 3);
        assert_eq!(resumo.devolucoes_venda, 1);
        assert_eq!(resumo.devolucoes_compra, 1);
        assert_eq!(resumo.documentos_misto, 1);
        // R4 (saída mista) + R1 (5202 em entrada).
        assert_eq!(resumo.total_erros, 2);
        // R3 x3 + R2 (sem CFOP).
        assert_eq!(resumo.total_alertas, 4);
        assert_eq!(resumo.documentos_com_pendencias().count(), 4);
    }
}
